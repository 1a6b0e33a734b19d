//! Conquest ingestion for one server.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use twhelp_common::Server;
use twhelp_store::{ServerTimestamp, Store};

use crate::loader::SnapshotLoader;

/// How far back to look when nothing has been stored yet. The upstream
/// endpoint serves no more than this anyway.
const INITIAL_WINDOW_HOURS: i64 = 24;

/// Store conquests newer than the latest one already stored. Returns the
/// number inserted.
pub async fn update_server_ennoblements(
    store: &dyn Store,
    loader: &dyn SnapshotLoader,
    server: &Server,
    now: DateTime<Utc>,
) -> Result<u64> {
    let started = Instant::now();

    let since = {
        let mut tx = store.begin(&server.key).await?;
        tx.latest_ennoblement_at().await?
    }
    .unwrap_or(now - Duration::hours(INITIAL_WINDOW_HOURS));

    let fetched = loader
        .load_ennoblements(since)
        .await
        .with_context(|| format!("{}: couldn't load ennoblements", server.key))?;

    let mut tx = store.begin(&server.key).await?;
    // Another run may have stored some of these in the meantime.
    let latest = tx.latest_ennoblement_at().await?;
    let fresh: Vec<_> = fetched
        .into_iter()
        .filter(|e| latest.map_or(true, |at| e.ennobled_at > at))
        .collect();

    let inserted = tx.insert_ennoblements(&fresh).await?;
    tx.touch_server(ServerTimestamp::Ennoblements, now).await?;
    tx.commit()
        .await
        .with_context(|| format!("{}: couldn't commit the ennoblements", server.key))?;

    tracing::debug!(
        server = %server.key,
        %since,
        inserted,
        duration_ms = started.elapsed().as_millis() as u64,
        "Ennoblements updated"
    );
    Ok(inserted)
}
