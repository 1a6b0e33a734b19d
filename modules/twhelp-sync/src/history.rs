//! Daily history snapshot for one server.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use twhelp_common::{local_date, parse_timezone, PlayerHistory, Server, TribeHistory};
use twhelp_store::{ServerTimestamp, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistorySummary {
    pub player_rows: u64,
    pub tribe_rows: u64,
}

/// Record every active player and tribe as of today's local date.
///
/// A row that already exists for today is left alone, so a redelivered task
/// changes nothing.
pub async fn update_server_history(
    store: &dyn Store,
    server: &Server,
    now: DateTime<Utc>,
) -> Result<HistorySummary> {
    let started = Instant::now();
    let today = local_date(now, parse_timezone(&server.version.timezone)?);
    tracing::info!(server = %server.key, %today, "Server history update started");

    let mut tx = store.begin(&server.key).await?;

    let players: Vec<PlayerHistory> = tx
        .active_players()
        .await
        .context("couldn't load players")?
        .into_iter()
        .map(|p| PlayerHistory {
            player_id: p.id,
            tribe_id: p.tribe_id,
            total_villages: p.total_villages,
            points: p.points,
            rank: p.rank,
            create_date: today,
            opponents_defeated: p.opponents_defeated,
        })
        .collect();

    let tribes: Vec<TribeHistory> = tx
        .active_tribes()
        .await
        .context("couldn't load tribes")?
        .into_iter()
        .map(|t| TribeHistory {
            tribe_id: t.id,
            total_members: t.total_members,
            total_villages: t.total_villages,
            points: t.points,
            all_points: t.all_points,
            rank: t.rank,
            dominance: t.dominance,
            create_date: today,
            opponents_defeated: t.opponents_defeated,
        })
        .collect();

    let summary = HistorySummary {
        player_rows: tx.insert_player_history(&players).await?,
        tribe_rows: tx.insert_tribe_history(&tribes).await?,
    };
    tx.touch_server(ServerTimestamp::History, now).await?;
    tx.commit()
        .await
        .with_context(|| format!("{}: couldn't commit the history", server.key))?;

    tracing::info!(
        server = %server.key,
        duration_ms = started.elapsed().as_millis() as u64,
        player_rows = summary.player_rows,
        tribe_rows = summary.tribe_rows,
        "History updated"
    );
    Ok(summary)
}
