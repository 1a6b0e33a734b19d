//! One full data sync for one server.
//!
//! Everything upstream is fetched before the transaction opens, so a failed
//! fetch leaves the partition as it was. All writes then land in one
//! transaction scoped to the server's partition.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use twhelp_common::{
    local_date, parse_timezone, EntityKind, OpponentsDefeated, Player, PlayerToServer, Server,
    ServerDataUpdate, Tribe, Village,
};
use twhelp_store::Store;

use crate::loader::SnapshotLoader;
use crate::matcher::SortedById;
use crate::metrics;

/// Counts reported by a finished sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub players: usize,
    pub tribes: usize,
    pub villages: usize,
    pub deleted_players: usize,
    pub deactivated_tribes: u64,
    pub daily_player_stats: usize,
    pub daily_tribe_stats: usize,
}

/// Everything fetched from the world before any write.
struct Snapshot {
    players: Vec<Player>,
    tribes: Vec<Tribe>,
    villages: Vec<Village>,
    player_od: HashMap<i32, OpponentsDefeated>,
    config: String,
    building_config: String,
    unit_config: String,
}

/// Reconcile the stored state of `server` with a fresh snapshot from `loader`.
pub async fn sync_server_data(
    store: &dyn Store,
    loader: &dyn SnapshotLoader,
    server: &Server,
    now: DateTime<Utc>,
) -> Result<SyncSummary> {
    let started = Instant::now();
    tracing::info!(server = %server.key, "Server data sync started");

    let result = run(store, loader, server, now).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(summary) => tracing::info!(
            server = %server.key,
            duration_ms,
            players = summary.players,
            tribes = summary.tribes,
            villages = summary.villages,
            deleted_players = summary.deleted_players,
            deactivated_tribes = summary.deactivated_tribes,
            daily_player_stats = summary.daily_player_stats,
            daily_tribe_stats = summary.daily_tribe_stats,
            "Server data updated"
        ),
        Err(e) => tracing::error!(server = %server.key, duration_ms, error = %e, "Server data sync failed"),
    }

    result
}

async fn run(
    store: &dyn Store,
    loader: &dyn SnapshotLoader,
    server: &Server,
    now: DateTime<Utc>,
) -> Result<SyncSummary> {
    let today = local_date(now, parse_timezone(&server.version.timezone)?);
    let Snapshot {
        mut players,
        mut tribes,
        villages,
        player_od,
        config,
        building_config,
        unit_config,
    } = fetch(loader, &server.key).await?;

    let mut tx = store
        .begin(&server.key)
        .await
        .with_context(|| format!("{}: couldn't open the sync transaction", server.key))?;

    // Growth is measured from each player's first conquest.
    let mut first_conquests = tx.first_ennoblements().await?;
    let first_conquests = SortedById::sort(&mut first_conquests);
    for player in &mut players {
        if let Some(od) = player_od.get(&player.id) {
            player.opponents_defeated = *od;
        }
        if let Some(first) = first_conquests.get(player.id) {
            let days = metrics::days_between(now, first.ennobled_at);
            player.daily_growth = metrics::growth_rate(player.points, days);
        }
    }

    let players = SortedById::sort(&mut players);
    let tribes = SortedById::sort(&mut tribes);

    let deleted_players: Vec<i32> = tx
        .active_player_ids()
        .await
        .context("players that have been deleted couldn't be detected")?
        .into_iter()
        .filter(|id| !players.contains(*id))
        .collect();

    let mut summary = SyncSummary {
        players: players.len(),
        tribes: tribes.len(),
        villages: villages.len(),
        deleted_players: deleted_players.len(),
        ..SyncSummary::default()
    };

    if !tribes.is_empty() {
        tx.upsert_tribes(tribes.as_slice()).await?;
    }
    let present: Vec<i32> = tribes.iter().map(|t| t.id).collect();
    summary.deactivated_tribes = tx.deactivate_missing_tribes(&present, now).await?;

    if !tribes.is_empty() {
        let history = tx.latest_tribe_history(today).await?;
        let stats = metrics::daily_tribe_stats(tribes, &history);
        tx.upsert_daily_tribe_stats(&stats).await?;
        summary.daily_tribe_stats = stats.len();
    }

    tx.deactivate_players(&deleted_players, now).await?;

    if !players.is_empty() {
        tx.upsert_players(players.as_slice()).await?;

        let history = tx.latest_player_history(today).await?;
        let stats = metrics::daily_player_stats(players, &history);
        tx.upsert_daily_player_stats(&stats).await?;
        summary.daily_player_stats = stats.len();

        let links: Vec<PlayerToServer> = players
            .iter()
            .map(|p| PlayerToServer {
                player_id: p.id,
                server_key: server.key.clone(),
            })
            .collect();
        tx.associate_players(&links).await?;
    }

    tx.upsert_villages(&villages).await?;

    tx.update_server_data(&ServerDataUpdate {
        data_updated_at: now,
        config,
        building_config,
        unit_config,
        number_of_players: count(players.len()),
        number_of_tribes: count(tribes.len()),
        number_of_villages: count(villages.len()),
    })
    .await?;

    tx.commit().await?;
    Ok(summary)
}

async fn fetch(loader: &dyn SnapshotLoader, server_key: &str) -> Result<Snapshot> {
    let (player_od, tribe_od) = futures::try_join!(
        loader.load_opponents_defeated(EntityKind::Player),
        loader.load_opponents_defeated(EntityKind::Tribe),
    )
    .with_context(|| format!("{server_key}: couldn't load opponents defeated"))?;

    let villages = loader
        .load_villages()
        .await
        .with_context(|| format!("{server_key}: couldn't load villages"))?;

    let contested = villages.iter().filter(|v| !v.is_barbarian()).count();
    let mut tribes = loader
        .load_tribes()
        .await
        .with_context(|| format!("{server_key}: couldn't load tribes"))?;
    for tribe in &mut tribes {
        if let Some(od) = tribe_od.get(&tribe.id) {
            tribe.opponents_defeated = *od;
        }
        tribe.dominance = metrics::dominance(tribe.total_villages, count(contested));
    }

    let players = loader
        .load_players()
        .await
        .with_context(|| format!("{server_key}: couldn't load players"))?;

    let (config, building_config, unit_config) = futures::try_join!(
        loader.get_config(),
        loader.get_building_config(),
        loader.get_unit_config(),
    )
    .with_context(|| format!("{server_key}: couldn't load the world config"))?;

    Ok(Snapshot {
        players,
        tribes,
        villages,
        player_od,
        config,
        building_config,
        unit_config,
    })
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
