//! In-memory store for tests. No database required.
//!
//! A transaction works on a private copy of one partition. On commit, every
//! table it wrote replaces the live table and the rest are left alone, so
//! transactions touching different tables of one server don't clobber each
//! other; two writers of the same table are last-writer-wins. Dropping a
//! transaction without committing discards the copy.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use twhelp_common::{
    DailyPlayerStats, DailyTribeStats, Ennoblement, EntityState, Player, PlayerHistory,
    PlayerToServer, Server, ServerDataUpdate, ServerStats, ServerStatus, Tribe, TribeHistory,
    Version, Village,
};

use crate::traits::{ServerFilter, ServerTimestamp, Store, StoreTx, VillageFilter};

/// Everything stored for one server.
#[derive(Debug, Clone, Default)]
pub struct PartitionData {
    pub players: BTreeMap<i32, Player>,
    pub tribes: BTreeMap<i32, Tribe>,
    pub villages: BTreeMap<i32, Village>,
    pub ennoblements: Vec<Ennoblement>,
    pub player_history: BTreeMap<(i32, NaiveDate), PlayerHistory>,
    pub tribe_history: BTreeMap<(i32, NaiveDate), TribeHistory>,
    pub daily_player_stats: BTreeMap<(i32, NaiveDate), DailyPlayerStats>,
    pub daily_tribe_stats: BTreeMap<(i32, NaiveDate), DailyTribeStats>,
    pub stats: BTreeMap<NaiveDate, ServerStats>,
}

/// Opaque configuration documents saved with a data sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerBlobs {
    pub config: String,
    pub building_config: String,
    pub unit_config: String,
}

#[derive(Default)]
struct Inner {
    versions: BTreeMap<String, Version>,
    servers: BTreeMap<String, Server>,
    blobs: HashMap<String, ServerBlobs>,
    player_servers: BTreeSet<(i32, String)>,
    partitions: HashMap<String, PartitionData>,
    failing: Option<&'static str>,
    commits: usize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Seeding and inspection ---

    pub fn insert_version(&self, version: Version) {
        self.lock().versions.insert(version.code.clone(), version);
    }

    /// Insert a server row and give it an empty partition.
    pub fn insert_server(&self, server: Server) {
        let mut inner = self.lock();
        inner.partitions.entry(server.key.clone()).or_default();
        inner.servers.insert(server.key.clone(), server);
    }

    pub fn server(&self, key: &str) -> Option<Server> {
        self.lock().servers.get(key).cloned()
    }

    pub fn blobs(&self, key: &str) -> Option<ServerBlobs> {
        self.lock().blobs.get(key).cloned()
    }

    /// Snapshot of a partition's committed contents.
    pub fn partition(&self, key: &str) -> Option<PartitionData> {
        self.lock().partitions.get(key).cloned()
    }

    /// Mutate a partition directly, outside any transaction.
    pub fn seed_partition(&self, key: &str, seed: impl FnOnce(&mut PartitionData)) {
        seed(self.lock().partitions.entry(key.to_string()).or_default());
    }

    pub fn player_servers(&self) -> Vec<(i32, String)> {
        self.lock().player_servers.iter().cloned().collect()
    }

    /// Number of transactions committed so far.
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    /// Make every transactional call named `operation` fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        self.lock().failing = Some(operation);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn versions(&self) -> Result<Vec<Version>> {
        Ok(self.lock().versions.values().cloned().collect())
    }

    async fn servers(&self, filter: &ServerFilter) -> Result<Vec<Server>> {
        Ok(self
            .lock()
            .servers
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn provision_partition(&self, server_key: &str) -> Result<()> {
        self.lock()
            .partitions
            .entry(server_key.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert_open_servers(&self, servers: &[Server]) -> Result<u64> {
        let mut inner = self.lock();
        for server in servers {
            match inner.servers.get_mut(&server.key) {
                Some(existing) => {
                    existing.status = ServerStatus::Open;
                    existing.version_code = server.version_code.clone();
                    existing.version = server.version.clone();
                }
                None => {
                    let mut fresh = server.clone();
                    fresh.status = ServerStatus::Open;
                    inner.servers.insert(server.key.clone(), fresh);
                }
            }
        }
        Ok(servers.len() as u64)
    }

    async fn close_unlisted_servers(&self, version_code: &str, listed: &[String]) -> Result<u64> {
        let mut closed = 0;
        for server in self.lock().servers.values_mut() {
            if server.version_code == version_code
                && server.is_open()
                && !listed.contains(&server.key)
            {
                server.status = ServerStatus::Closed;
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn begin(&self, server_key: &str) -> Result<Box<dyn StoreTx>> {
        let data = self
            .lock()
            .partitions
            .get(server_key)
            .cloned()
            .ok_or_else(|| anyhow!("partition {server_key} has not been provisioned"))?;

        Ok(Box::new(MemoryTx {
            store: self.clone(),
            server_key: server_key.to_string(),
            data,
            written: Written::default(),
            links: Vec::new(),
            data_update: None,
            touched: Vec::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// MemoryTx
// ---------------------------------------------------------------------------

/// Tables written by a transaction.
#[derive(Debug, Clone, Copy, Default)]
struct Written {
    players: bool,
    tribes: bool,
    villages: bool,
    ennoblements: bool,
    player_history: bool,
    tribe_history: bool,
    daily_player_stats: bool,
    daily_tribe_stats: bool,
    stats: bool,
}

impl Written {
    fn apply(self, staged: PartitionData, live: &mut PartitionData) {
        if self.players {
            live.players = staged.players;
        }
        if self.tribes {
            live.tribes = staged.tribes;
        }
        if self.villages {
            live.villages = staged.villages;
        }
        if self.ennoblements {
            live.ennoblements = staged.ennoblements;
        }
        if self.player_history {
            live.player_history = staged.player_history;
        }
        if self.tribe_history {
            live.tribe_history = staged.tribe_history;
        }
        if self.daily_player_stats {
            live.daily_player_stats = staged.daily_player_stats;
        }
        if self.daily_tribe_stats {
            live.daily_tribe_stats = staged.daily_tribe_stats;
        }
        if self.stats {
            live.stats = staged.stats;
        }
    }
}

pub struct MemoryTx {
    store: MemoryStore,
    server_key: String,
    data: PartitionData,
    written: Written,
    links: Vec<PlayerToServer>,
    data_update: Option<ServerDataUpdate>,
    touched: Vec<(ServerTimestamp, DateTime<Utc>)>,
}

impl MemoryTx {
    fn check(&self, operation: &'static str) -> Result<()> {
        if self.store.lock().failing == Some(operation) {
            bail!("{operation}: injected failure");
        }
        Ok(())
    }

    fn ensure_server(&self) -> Result<()> {
        if !self.store.lock().servers.contains_key(&self.server_key) {
            bail!("server {} does not exist", self.server_key);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    fn server_key(&self) -> &str {
        &self.server_key
    }

    // --- Reads ---

    async fn active_player_ids(&mut self) -> Result<Vec<i32>> {
        self.check("active_player_ids")?;
        Ok(self
            .data
            .players
            .values()
            .filter(|p| p.state.is_active())
            .map(|p| p.id)
            .collect())
    }

    async fn active_players(&mut self) -> Result<Vec<Player>> {
        self.check("active_players")?;
        Ok(self
            .data
            .players
            .values()
            .filter(|p| p.state.is_active())
            .cloned()
            .collect())
    }

    async fn active_tribes(&mut self) -> Result<Vec<Tribe>> {
        self.check("active_tribes")?;
        Ok(self
            .data
            .tribes
            .values()
            .filter(|t| t.state.is_active())
            .cloned()
            .collect())
    }

    async fn first_ennoblements(&mut self) -> Result<Vec<Ennoblement>> {
        self.check("first_ennoblements")?;
        let mut first: BTreeMap<i32, &Ennoblement> = BTreeMap::new();
        for e in &self.data.ennoblements {
            let earlier = first
                .get(&e.new_owner_id)
                .map_or(true, |seen| e.ennobled_at < seen.ennobled_at);
            if earlier {
                first.insert(e.new_owner_id, e);
            }
        }
        Ok(first.into_values().cloned().collect())
    }

    async fn latest_ennoblement_at(&mut self) -> Result<Option<DateTime<Utc>>> {
        self.check("latest_ennoblement_at")?;
        Ok(self.data.ennoblements.iter().map(|e| e.ennobled_at).max())
    }

    async fn latest_player_history(&mut self, before: NaiveDate) -> Result<Vec<PlayerHistory>> {
        self.check("latest_player_history")?;
        let mut latest: BTreeMap<i32, &PlayerHistory> = BTreeMap::new();
        for ((player_id, date), row) in &self.data.player_history {
            let active = self
                .data
                .players
                .get(player_id)
                .is_some_and(|p| p.state.is_active());
            if active && *date < before {
                latest.insert(*player_id, row);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn latest_tribe_history(&mut self, before: NaiveDate) -> Result<Vec<TribeHistory>> {
        self.check("latest_tribe_history")?;
        let mut latest: BTreeMap<i32, &TribeHistory> = BTreeMap::new();
        for ((tribe_id, date), row) in &self.data.tribe_history {
            let active = self
                .data
                .tribes
                .get(tribe_id)
                .is_some_and(|t| t.state.is_active());
            if active && *date < before {
                latest.insert(*tribe_id, row);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn count_players(&mut self, state: EntityState) -> Result<i64> {
        self.check("count_players")?;
        Ok(self.data.players.values().filter(|p| p.state == state).count() as i64)
    }

    async fn count_tribes(&mut self, state: EntityState) -> Result<i64> {
        self.check("count_tribes")?;
        Ok(self.data.tribes.values().filter(|t| t.state == state).count() as i64)
    }

    async fn count_villages(&mut self, filter: VillageFilter) -> Result<i64> {
        self.check("count_villages")?;
        Ok(self
            .data
            .villages
            .values()
            .filter(|v| filter.matches(v))
            .count() as i64)
    }

    async fn village_ids(&mut self) -> Result<Vec<i32>> {
        self.check("village_ids")?;
        Ok(self.data.villages.keys().copied().collect())
    }

    // --- Current state ---

    async fn upsert_tribes(&mut self, tribes: &[Tribe]) -> Result<u64> {
        self.check("upsert_tribes")?;
        self.written.tribes = true;
        for tribe in tribes {
            let mut row = tribe.clone();
            row.deleted_at = None;
            self.data.tribes.insert(row.id, row);
        }
        Ok(tribes.len() as u64)
    }

    async fn deactivate_missing_tribes(&mut self, present: &[i32], at: DateTime<Utc>) -> Result<u64> {
        self.check("deactivate_missing_tribes")?;
        self.written.tribes = true;
        let mut changed = 0;
        for tribe in self.data.tribes.values_mut() {
            if tribe.state.is_active() && !present.contains(&tribe.id) {
                tribe.state = EntityState::Inactive;
                tribe.deleted_at = Some(at);
                tribe.dominance = 0.0;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn upsert_players(&mut self, players: &[Player]) -> Result<u64> {
        self.check("upsert_players")?;
        self.written.players = true;
        for player in players {
            let mut row = player.clone();
            row.deleted_at = None;
            self.data.players.insert(row.id, row);
        }
        Ok(players.len() as u64)
    }

    async fn deactivate_players(&mut self, ids: &[i32], at: DateTime<Utc>) -> Result<u64> {
        self.check("deactivate_players")?;
        self.written.players = true;
        let mut changed = 0;
        for id in ids {
            if let Some(player) = self.data.players.get_mut(id) {
                player.state = EntityState::Inactive;
                player.tribe_id = 0;
                player.deleted_at = Some(at);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn associate_players(&mut self, links: &[PlayerToServer]) -> Result<u64> {
        self.check("associate_players")?;
        self.links.extend_from_slice(links);
        Ok(links.len() as u64)
    }

    async fn upsert_villages(&mut self, villages: &[Village]) -> Result<u64> {
        self.check("upsert_villages")?;
        self.written.villages = true;
        for village in villages {
            self.data.villages.insert(village.id, village.clone());
        }
        Ok(villages.len() as u64)
    }

    async fn delete_villages(&mut self, ids: &[i32]) -> Result<u64> {
        self.check("delete_villages")?;
        self.written.villages = true;
        let mut deleted = 0;
        for id in ids {
            if self.data.villages.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn insert_ennoblements(&mut self, ennoblements: &[Ennoblement]) -> Result<u64> {
        self.check("insert_ennoblements")?;
        self.written.ennoblements = true;
        self.data.ennoblements.extend_from_slice(ennoblements);
        Ok(ennoblements.len() as u64)
    }

    // --- History and stats ---

    async fn upsert_daily_player_stats(&mut self, stats: &[DailyPlayerStats]) -> Result<u64> {
        self.check("upsert_daily_player_stats")?;
        self.written.daily_player_stats = true;
        for row in stats {
            self.data
                .daily_player_stats
                .insert((row.player_id, row.create_date), row.clone());
        }
        Ok(stats.len() as u64)
    }

    async fn upsert_daily_tribe_stats(&mut self, stats: &[DailyTribeStats]) -> Result<u64> {
        self.check("upsert_daily_tribe_stats")?;
        self.written.daily_tribe_stats = true;
        for row in stats {
            self.data
                .daily_tribe_stats
                .insert((row.tribe_id, row.create_date), row.clone());
        }
        Ok(stats.len() as u64)
    }

    async fn insert_player_history(&mut self, rows: &[PlayerHistory]) -> Result<u64> {
        self.check("insert_player_history")?;
        self.written.player_history = true;
        let mut inserted = 0;
        for row in rows {
            let key = (row.player_id, row.create_date);
            if !self.data.player_history.contains_key(&key) {
                self.data.player_history.insert(key, row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_tribe_history(&mut self, rows: &[TribeHistory]) -> Result<u64> {
        self.check("insert_tribe_history")?;
        self.written.tribe_history = true;
        let mut inserted = 0;
        for row in rows {
            let key = (row.tribe_id, row.create_date);
            if !self.data.tribe_history.contains_key(&key) {
                self.data.tribe_history.insert(key, row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_server_stats(&mut self, stats: &ServerStats) -> Result<u64> {
        self.check("insert_server_stats")?;
        self.written.stats = true;
        if self.data.stats.contains_key(&stats.create_date) {
            return Ok(0);
        }
        self.data.stats.insert(stats.create_date, stats.clone());
        Ok(1)
    }

    async fn delete_history_before(&mut self, cutoff: NaiveDate) -> Result<u64> {
        self.check("delete_history_before")?;
        self.written.player_history = true;
        self.written.tribe_history = true;
        self.written.daily_player_stats = true;
        self.written.daily_tribe_stats = true;
        let data = &mut self.data;
        let before = data.player_history.len()
            + data.tribe_history.len()
            + data.daily_player_stats.len()
            + data.daily_tribe_stats.len();

        data.player_history.retain(|(_, date), _| *date >= cutoff);
        data.tribe_history.retain(|(_, date), _| *date >= cutoff);
        data.daily_player_stats.retain(|(_, date), _| *date >= cutoff);
        data.daily_tribe_stats.retain(|(_, date), _| *date >= cutoff);

        let after = data.player_history.len()
            + data.tribe_history.len()
            + data.daily_player_stats.len()
            + data.daily_tribe_stats.len();
        Ok((before - after) as u64)
    }

    // --- Server row ---

    async fn update_server_data(&mut self, update: &ServerDataUpdate) -> Result<()> {
        self.check("update_server_data")?;
        self.ensure_server()?;
        self.data_update = Some(update.clone());
        Ok(())
    }

    async fn touch_server(&mut self, column: ServerTimestamp, at: DateTime<Utc>) -> Result<()> {
        self.check("touch_server")?;
        self.ensure_server()?;
        self.touched.push((column, at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check("commit")?;
        let MemoryTx {
            store,
            server_key,
            data,
            written,
            links,
            data_update,
            touched,
        } = *self;

        let mut inner = store.lock();
        for link in links {
            inner.player_servers.insert((link.player_id, link.server_key));
        }
        if let Some(server) = inner.servers.get_mut(&server_key) {
            if let Some(update) = &data_update {
                server.data_updated_at = Some(update.data_updated_at);
                server.number_of_players = update.number_of_players;
                server.number_of_tribes = update.number_of_tribes;
                server.number_of_villages = update.number_of_villages;
            }
            for (column, at) in &touched {
                match column {
                    ServerTimestamp::History => server.history_updated_at = Some(*at),
                    ServerTimestamp::Stats => server.stats_updated_at = Some(*at),
                    ServerTimestamp::Ennoblements => server.ennoblements_updated_at = Some(*at),
                }
            }
        }
        if let Some(update) = data_update {
            inner.blobs.insert(
                server_key.clone(),
                ServerBlobs {
                    config: update.config,
                    building_config: update.building_config,
                    unit_config: update.unit_config,
                },
            );
        }
        written.apply(data, inner.partitions.entry(server_key).or_default());
        inner.commits += 1;
        Ok(())
    }
}
