//! Storage seam consumed by the sync jobs.
//!
//! Global operations (versions, servers) live on `Store`. Everything scoped to
//! one world's partition goes through a `StoreTx` opened with `Store::begin`.
//! Dropping a `StoreTx` without calling `commit` rolls it back.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use twhelp_common::{
    DailyPlayerStats, DailyTribeStats, Ennoblement, EntityState, Player, PlayerHistory,
    PlayerToServer, Server, ServerDataUpdate, ServerStats, ServerStatus, Tribe, TribeHistory,
    Version, Village,
};

/// Which servers to load. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFilter {
    pub status: Option<ServerStatus>,
    pub version_code: Option<String>,
    pub timezone: Option<String>,
}

impl ServerFilter {
    pub fn open() -> Self {
        Self {
            status: Some(ServerStatus::Open),
            ..Self::default()
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn matches(&self, server: &Server) -> bool {
        self.status.map_or(true, |s| s == server.status)
            && self
                .version_code
                .as_deref()
                .map_or(true, |code| code == server.version_code)
            && self
                .timezone
                .as_deref()
                .map_or(true, |tz| tz == server.version.timezone)
    }
}

/// Village categories counted by the stats job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VillageFilter {
    All,
    Barbarian,
    Bonus,
    PlayerOwned,
}

impl VillageFilter {
    pub fn matches(self, village: &Village) -> bool {
        match self {
            VillageFilter::All => true,
            VillageFilter::Barbarian => village.is_barbarian(),
            VillageFilter::Bonus => village.has_bonus(),
            VillageFilter::PlayerOwned => !village.is_barbarian(),
        }
    }
}

/// Per-job bookkeeping timestamps on the server row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerTimestamp {
    History,
    Stats,
    Ennoblements,
}

impl ServerTimestamp {
    pub fn column(self) -> &'static str {
        match self {
            ServerTimestamp::History => "history_updated_at",
            ServerTimestamp::Stats => "stats_updated_at",
            ServerTimestamp::Ennoblements => "ennoblements_updated_at",
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn versions(&self) -> Result<Vec<Version>>;

    async fn servers(&self, filter: &ServerFilter) -> Result<Vec<Server>>;

    /// Create the data partition for a server if it does not exist yet.
    async fn provision_partition(&self, server_key: &str) -> Result<()>;

    /// Insert the servers, or re-open them and refresh their version on conflict.
    async fn upsert_open_servers(&self, servers: &[Server]) -> Result<u64>;

    /// Close every server of `version_code` whose key is not in `listed`.
    async fn close_unlisted_servers(&self, version_code: &str, listed: &[String]) -> Result<u64>;

    /// Open a transaction scoped to one server's partition.
    async fn begin(&self, server_key: &str) -> Result<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    fn server_key(&self) -> &str;

    // --- Reads ---

    async fn active_player_ids(&mut self) -> Result<Vec<i32>>;

    async fn active_players(&mut self) -> Result<Vec<Player>>;

    async fn active_tribes(&mut self) -> Result<Vec<Tribe>>;

    /// The earliest ennoblement per new owner, ordered by `new_owner_id` ascending.
    async fn first_ennoblements(&mut self) -> Result<Vec<Ennoblement>>;

    async fn latest_ennoblement_at(&mut self) -> Result<Option<DateTime<Utc>>>;

    /// Latest history row strictly before `before` for every active player.
    async fn latest_player_history(&mut self, before: NaiveDate) -> Result<Vec<PlayerHistory>>;

    /// Latest history row strictly before `before` for every active tribe.
    async fn latest_tribe_history(&mut self, before: NaiveDate) -> Result<Vec<TribeHistory>>;

    async fn count_players(&mut self, state: EntityState) -> Result<i64>;

    async fn count_tribes(&mut self, state: EntityState) -> Result<i64>;

    async fn count_villages(&mut self, filter: VillageFilter) -> Result<i64>;

    async fn village_ids(&mut self) -> Result<Vec<i32>>;

    // --- Current state ---

    async fn upsert_tribes(&mut self, tribes: &[Tribe]) -> Result<u64>;

    /// Mark active tribes not in `present` inactive and zero their dominance.
    async fn deactivate_missing_tribes(&mut self, present: &[i32], at: DateTime<Utc>) -> Result<u64>;

    async fn upsert_players(&mut self, players: &[Player]) -> Result<u64>;

    /// Mark the given players inactive and clear their tribe.
    async fn deactivate_players(&mut self, ids: &[i32], at: DateTime<Utc>) -> Result<u64>;

    /// Link players to the server, ignoring links that already exist.
    async fn associate_players(&mut self, links: &[PlayerToServer]) -> Result<u64>;

    async fn upsert_villages(&mut self, villages: &[Village]) -> Result<u64>;

    async fn delete_villages(&mut self, ids: &[i32]) -> Result<u64>;

    async fn insert_ennoblements(&mut self, ennoblements: &[Ennoblement]) -> Result<u64>;

    // --- History and stats ---

    /// Overwrites on (player_id, create_date).
    async fn upsert_daily_player_stats(&mut self, stats: &[DailyPlayerStats]) -> Result<u64>;

    /// Overwrites on (tribe_id, create_date).
    async fn upsert_daily_tribe_stats(&mut self, stats: &[DailyTribeStats]) -> Result<u64>;

    /// Ignores rows whose (player_id, create_date) already exists.
    async fn insert_player_history(&mut self, rows: &[PlayerHistory]) -> Result<u64>;

    /// Ignores rows whose (tribe_id, create_date) already exists.
    async fn insert_tribe_history(&mut self, rows: &[TribeHistory]) -> Result<u64>;

    /// Ignores a second row for the same create_date.
    async fn insert_server_stats(&mut self, stats: &ServerStats) -> Result<u64>;

    /// Delete history and daily stats dated before `cutoff`.
    async fn delete_history_before(&mut self, cutoff: NaiveDate) -> Result<u64>;

    // --- Server row ---

    async fn update_server_data(&mut self, update: &ServerDataUpdate) -> Result<()>;

    async fn touch_server(&mut self, column: ServerTimestamp, at: DateTime<Utc>) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Arc<S> blanket
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn versions(&self) -> Result<Vec<Version>> {
        (**self).versions().await
    }

    async fn servers(&self, filter: &ServerFilter) -> Result<Vec<Server>> {
        (**self).servers(filter).await
    }

    async fn provision_partition(&self, server_key: &str) -> Result<()> {
        (**self).provision_partition(server_key).await
    }

    async fn upsert_open_servers(&self, servers: &[Server]) -> Result<u64> {
        (**self).upsert_open_servers(servers).await
    }

    async fn close_unlisted_servers(&self, version_code: &str, listed: &[String]) -> Result<u64> {
        (**self).close_unlisted_servers(version_code, listed).await
    }

    async fn begin(&self, server_key: &str) -> Result<Box<dyn StoreTx>> {
        (**self).begin(server_key).await
    }
}
