//! Daily aggregate counts for one server.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use twhelp_common::{local_date, parse_timezone, EntityState, Server, ServerStats};
use twhelp_store::{ServerTimestamp, Store, VillageFilter};

/// Count players, tribes and villages and store the totals under today's
/// local date. A second run on the same date keeps the first row.
pub async fn update_server_stats(
    store: &dyn Store,
    server: &Server,
    now: DateTime<Utc>,
) -> Result<ServerStats> {
    let started = Instant::now();
    let today = local_date(now, parse_timezone(&server.version.timezone)?);
    tracing::info!(server = %server.key, %today, "Server stats update started");

    let mut tx = store.begin(&server.key).await?;

    let active_players = tx.count_players(EntityState::Active).await?;
    let inactive_players = tx.count_players(EntityState::Inactive).await?;
    let active_tribes = tx.count_tribes(EntityState::Active).await?;
    let inactive_tribes = tx.count_tribes(EntityState::Inactive).await?;

    let stats = ServerStats {
        active_players,
        inactive_players,
        players: active_players + inactive_players,
        active_tribes,
        inactive_tribes,
        tribes: active_tribes + inactive_tribes,
        barbarian_villages: tx.count_villages(VillageFilter::Barbarian).await?,
        bonus_villages: tx.count_villages(VillageFilter::Bonus).await?,
        player_villages: tx.count_villages(VillageFilter::PlayerOwned).await?,
        villages: tx.count_villages(VillageFilter::All).await?,
        create_date: today,
    };

    tx.insert_server_stats(&stats).await?;
    tx.touch_server(ServerTimestamp::Stats, now).await?;
    tx.commit()
        .await
        .with_context(|| format!("{}: couldn't commit the stats", server.key))?;

    tracing::info!(
        server = %server.key,
        duration_ms = started.elapsed().as_millis() as u64,
        players = stats.players,
        tribes = stats.tribes,
        villages = stats.villages,
        "Stats updated"
    );
    Ok(stats)
}
