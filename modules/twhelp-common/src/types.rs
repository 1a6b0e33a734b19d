use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UnknownStatus;

// --- Lifecycle ---

/// Whether an entity still appears in the world's snapshot.
///
/// Persisted as the `exists` boolean column; the mapping happens at the row
/// boundary so nothing downstream filters on a raw flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    #[default]
    Active,
    Inactive,
}

impl EntityState {
    pub fn is_active(self) -> bool {
        matches!(self, EntityState::Active)
    }

    /// Value of the `exists` column.
    pub fn as_exists(self) -> bool {
        self.is_active()
    }
}

impl From<bool> for EntityState {
    fn from(exists: bool) -> Self {
        if exists {
            EntityState::Active
        } else {
            EntityState::Inactive
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Open,
    Closed,
}

impl ServerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Open => "open",
            ServerStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ServerStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "open" => Ok(ServerStatus::Open),
            "closed" => Ok(ServerStatus::Closed),
            _ => Err(UnknownStatus(value)),
        }
    }
}

/// Player or tribe. Selects the variant of endpoints and tables that differ
/// only by entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Tribe,
}

// --- Value objects ---

/// Opponents-defeated rankings: four boards, a rank and a score each.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct OpponentsDefeated {
    pub rank_att: i32,
    pub score_att: i32,
    pub rank_def: i32,
    pub score_def: i32,
    pub rank_sup: i32,
    pub score_sup: i32,
    pub rank_total: i32,
    pub score_total: i32,
}

impl OpponentsDefeated {
    /// Change from `old` to `self`. Scores subtract; ranks flip sign so that
    /// climbing the board is positive.
    pub fn delta(&self, old: &OpponentsDefeated) -> OpponentsDefeated {
        OpponentsDefeated {
            rank_att: (self.rank_att - old.rank_att) * -1,
            score_att: self.score_att - old.score_att,
            rank_def: (self.rank_def - old.rank_def) * -1,
            score_def: self.score_def - old.score_def,
            rank_sup: (self.rank_sup - old.rank_sup) * -1,
            score_sup: self.score_sup - old.score_sup,
            rank_total: (self.rank_total - old.rank_total) * -1,
            score_total: self.score_total - old.score_total,
        }
    }
}

// --- Entities ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Player {
    pub id: i32,
    pub name: String,
    pub tribe_id: i32,
    pub total_villages: i32,
    pub points: i32,
    pub rank: i32,
    pub daily_growth: i32,
    #[sqlx(rename = "exists", try_from = "bool")]
    pub state: EntityState,
    pub deleted_at: Option<DateTime<Utc>>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub opponents_defeated: OpponentsDefeated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tribe {
    pub id: i32,
    pub name: String,
    pub tag: String,
    pub total_members: i32,
    pub total_villages: i32,
    pub points: i32,
    pub all_points: i32,
    pub rank: i32,
    pub dominance: f64,
    #[sqlx(rename = "exists", try_from = "bool")]
    pub state: EntityState,
    pub deleted_at: Option<DateTime<Utc>>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub opponents_defeated: OpponentsDefeated,
}

/// `player_id == 0` marks a barbarian (unowned) village.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Village {
    pub id: i32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub points: i32,
    pub bonus: i32,
    pub player_id: i32,
}

impl Village {
    pub fn is_barbarian(&self) -> bool {
        self.player_id == 0
    }

    pub fn has_bonus(&self) -> bool {
        self.bonus != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ennoblement {
    pub village_id: i32,
    pub new_owner_id: i32,
    pub new_owner_tribe_id: i32,
    pub old_owner_id: i32,
    pub old_owner_tribe_id: i32,
    pub ennobled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerToServer {
    pub player_id: i32,
    pub server_key: String,
}

// --- History and derived stats ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlayerHistory {
    pub player_id: i32,
    pub tribe_id: i32,
    pub total_villages: i32,
    pub points: i32,
    pub rank: i32,
    pub create_date: NaiveDate,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub opponents_defeated: OpponentsDefeated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TribeHistory {
    pub tribe_id: i32,
    pub total_members: i32,
    pub total_villages: i32,
    pub points: i32,
    pub all_points: i32,
    pub rank: i32,
    pub dominance: f64,
    pub create_date: NaiveDate,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub opponents_defeated: OpponentsDefeated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyPlayerStats {
    pub player_id: i32,
    pub villages: i32,
    pub points: i32,
    pub rank: i32,
    pub create_date: NaiveDate,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub opponents_defeated: OpponentsDefeated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyTribeStats {
    pub tribe_id: i32,
    pub members: i32,
    pub villages: i32,
    pub points: i32,
    pub all_points: i32,
    pub rank: i32,
    pub dominance: f64,
    pub create_date: NaiveDate,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub opponents_defeated: OpponentsDefeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServerStats {
    pub active_players: i64,
    pub inactive_players: i64,
    pub players: i64,
    pub active_tribes: i64,
    pub inactive_tribes: i64,
    pub tribes: i64,
    pub barbarian_villages: i64,
    pub bonus_villages: i64,
    pub player_villages: i64,
    pub villages: i64,
    pub create_date: NaiveDate,
}

// --- Servers and versions ---

/// A market: one host serving many worlds, all on the same clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Version {
    pub code: String,
    pub name: String,
    pub host: String,
    pub timezone: String,
    pub special_servers: Vec<String>,
}

/// One game world. Its key names the world's data partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Server {
    pub key: String,
    #[sqlx(try_from = "String")]
    pub status: ServerStatus,
    pub version_code: String,
    pub number_of_players: i32,
    pub number_of_tribes: i32,
    pub number_of_villages: i32,
    pub data_updated_at: Option<DateTime<Utc>>,
    pub history_updated_at: Option<DateTime<Utc>>,
    pub stats_updated_at: Option<DateTime<Utc>>,
    pub ennoblements_updated_at: Option<DateTime<Utc>>,
    #[sqlx(flatten)]
    pub version: Version,
}

impl Server {
    /// A freshly listed server that has never been synced.
    pub fn open(key: impl Into<String>, version: Version) -> Self {
        Self {
            key: key.into(),
            status: ServerStatus::Open,
            version_code: version.code.clone(),
            number_of_players: 0,
            number_of_tribes: 0,
            number_of_villages: 0,
            data_updated_at: None,
            history_updated_at: None,
            stats_updated_at: None,
            ennoblements_updated_at: None,
            version,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ServerStatus::Open
    }

    /// Base URL of the world's public data, e.g. `https://en115.tribalwars.net`.
    pub fn url(&self) -> String {
        format!("https://{}.{}", self.key, self.version.host)
    }
}

/// Columns written to the server row when a data sync commits.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDataUpdate {
    pub data_updated_at: DateTime<Utc>,
    pub config: String,
    pub building_config: String,
    pub unit_config: String,
    pub number_of_players: i32,
    pub number_of_tribes: i32,
    pub number_of_villages: i32,
}
