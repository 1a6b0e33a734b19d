//! Retention for history and daily stats.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use twhelp_common::{local_date, parse_timezone, Server};
use twhelp_store::Store;

/// Delete history and daily stats older than `retention_days` local days.
pub async fn vacuum_server_data(
    store: &dyn Store,
    server: &Server,
    now: DateTime<Utc>,
    retention_days: i64,
) -> Result<u64> {
    let today = local_date(now, parse_timezone(&server.version.timezone)?);
    let cutoff = today - Duration::days(retention_days);

    let mut tx = store.begin(&server.key).await?;
    let deleted = tx.delete_history_before(cutoff).await?;
    tx.commit().await?;

    tracing::info!(server = %server.key, %cutoff, deleted, "Server data vacuumed");
    Ok(deleted)
}
