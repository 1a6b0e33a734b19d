//! Raw rows as published by a world's data endpoints.

use chrono::{DateTime, Utc};

/// One line of `/map/player.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: i32,
    pub name: String,
    pub tribe_id: i32,
    pub villages: i32,
    pub points: i32,
    pub rank: i32,
}

/// One line of `/map/ally.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct TribeRecord {
    pub id: i32,
    pub name: String,
    pub tag: String,
    pub members: i32,
    pub villages: i32,
    pub points: i32,
    pub all_points: i32,
    pub rank: i32,
}

/// One line of `/map/village.txt`. `player_id == 0` means barbarian.
#[derive(Debug, Clone, PartialEq)]
pub struct VillageRecord {
    pub id: i32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub player_id: i32,
    pub points: i32,
    pub bonus: i32,
}

/// One line of a `/map/kill_*.txt` ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillRecord {
    pub rank: i32,
    pub id: i32,
    pub score: i32,
}

/// Which opponents-defeated ranking to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillBoard {
    Attack,
    Defense,
    Support,
    Total,
}

impl KillBoard {
    pub const ALL: [KillBoard; 4] = [
        KillBoard::Attack,
        KillBoard::Defense,
        KillBoard::Support,
        KillBoard::Total,
    ];

    pub(crate) fn file_stem(self) -> &'static str {
        match self {
            KillBoard::Attack => "kill_att",
            KillBoard::Defense => "kill_def",
            KillBoard::Support => "kill_sup",
            KillBoard::Total => "kill_all",
        }
    }
}

/// One line of `get_conquer_extended`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConquerRecord {
    pub village_id: i32,
    pub ennobled_at: DateTime<Utc>,
    pub new_owner_id: i32,
    pub old_owner_id: i32,
    pub old_owner_tribe_id: i32,
    pub new_owner_tribe_id: i32,
    pub points: i32,
}

/// An entry of a version's server directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerListing {
    pub key: String,
    pub url: String,
}
