//! Derived metrics computed from a snapshot and the stored history.

use chrono::{DateTime, Utc};
use twhelp_common::{DailyPlayerStats, DailyTribeStats, Player, PlayerHistory, Tribe, TribeHistory};

use crate::matcher::SortedById;

/// Rank change with the sign flipped: moving from rank 10 to rank 7 is +3.
pub fn rank_delta(new: i32, old: i32) -> i32 {
    (new - old) * -1
}

/// Share of the contested villages held, in percent. Zero unless both inputs
/// are positive. Not clamped.
pub fn dominance(villages: i32, total: i32) -> f64 {
    if villages <= 0 || total <= 0 {
        return 0.0;
    }
    f64::from(villages) / f64::from(total) * 100.0
}

/// Points per day, floored. Zero when no whole day has passed.
pub fn growth_rate(points: i32, days: i64) -> i32 {
    if days <= 0 {
        return 0;
    }
    i64::from(points).div_euclid(days) as i32
}

/// Whole days from `then` to `now`, truncated.
pub fn days_between(now: DateTime<Utc>, then: DateTime<Utc>) -> i64 {
    (now - then).num_hours() / 24
}

/// One row per history record whose player is still in the snapshot.
pub fn daily_player_stats(
    players: SortedById<'_, Player>,
    history: &[PlayerHistory],
) -> Vec<DailyPlayerStats> {
    history
        .iter()
        .filter_map(|record| {
            let player = players.get(record.player_id)?;
            Some(DailyPlayerStats {
                player_id: player.id,
                villages: player.total_villages - record.total_villages,
                points: player.points - record.points,
                rank: rank_delta(player.rank, record.rank),
                create_date: record.create_date,
                opponents_defeated: player
                    .opponents_defeated
                    .delta(&record.opponents_defeated),
            })
        })
        .collect()
}

/// One row per history record whose tribe is still in the snapshot.
pub fn daily_tribe_stats(
    tribes: SortedById<'_, Tribe>,
    history: &[TribeHistory],
) -> Vec<DailyTribeStats> {
    history
        .iter()
        .filter_map(|record| {
            let tribe = tribes.get(record.tribe_id)?;
            Some(DailyTribeStats {
                tribe_id: tribe.id,
                members: tribe.total_members - record.total_members,
                villages: tribe.total_villages - record.total_villages,
                points: tribe.points - record.points,
                all_points: tribe.all_points - record.all_points,
                rank: rank_delta(tribe.rank, record.rank),
                dominance: tribe.dominance - record.dominance,
                create_date: record.create_date,
                opponents_defeated: tribe.opponents_defeated.delta(&record.opponents_defeated),
            })
        })
        .collect()
}
