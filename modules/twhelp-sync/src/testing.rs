// Test mocks for the sync jobs.
//
// - MockLoader (SnapshotLoader): fixed snapshot, per-operation failures
// - MockDirectory (DirectoryLoader): host → listings
// - MockLoaders (LoaderFactory): URL → MockLoader
//
// Plus fixture builders for versions, servers and entities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use twhelp_common::{
    Ennoblement, EntityKind, EntityState, OpponentsDefeated, Player, Server, Tribe, Version,
    Village,
};

use crate::loader::{DirectoryLoader, LoaderFactory, ServerListing, SnapshotLoader};

// ---------------------------------------------------------------------------
// MockLoader
// ---------------------------------------------------------------------------

/// A world whose endpoints always return the same snapshot.
/// Builder pattern: `.with_players()`, `.with_tribes()`, `.failing_on()`.
#[derive(Default)]
pub struct MockLoader {
    players: Vec<Player>,
    tribes: Vec<Tribe>,
    villages: Vec<Village>,
    player_od: HashMap<i32, OpponentsDefeated>,
    tribe_od: HashMap<i32, OpponentsDefeated>,
    ennoblements: Vec<Ennoblement>,
    failing: Vec<&'static str>,
    unreachable: bool,
    ennoblement_requests: Mutex<Vec<DateTime<Utc>>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails, like a world that is down.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_players(mut self, players: Vec<Player>) -> Self {
        self.players = players;
        self
    }

    pub fn with_tribes(mut self, tribes: Vec<Tribe>) -> Self {
        self.tribes = tribes;
        self
    }

    pub fn with_villages(mut self, villages: Vec<Village>) -> Self {
        self.villages = villages;
        self
    }

    pub fn with_od(mut self, kind: EntityKind, id: i32, od: OpponentsDefeated) -> Self {
        match kind {
            EntityKind::Player => self.player_od.insert(id, od),
            EntityKind::Tribe => self.tribe_od.insert(id, od),
        };
        self
    }

    pub fn with_ennoblements(mut self, ennoblements: Vec<Ennoblement>) -> Self {
        self.ennoblements = ennoblements;
        self
    }

    /// Make the named operation (e.g. `"load_villages"`) fail.
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.failing.push(operation);
        self
    }

    /// `since` arguments of every `load_ennoblements` call so far.
    pub fn ennoblement_requests(&self) -> Vec<DateTime<Utc>> {
        self.ennoblement_requests.lock().unwrap().clone()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.unreachable || self.failing.contains(&operation) {
            bail!("MockLoader: {operation} failed");
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotLoader for MockLoader {
    async fn load_players(&self) -> Result<Vec<Player>> {
        self.check("load_players")?;
        Ok(self.players.clone())
    }

    async fn load_tribes(&self) -> Result<Vec<Tribe>> {
        self.check("load_tribes")?;
        Ok(self.tribes.clone())
    }

    async fn load_villages(&self) -> Result<Vec<Village>> {
        self.check("load_villages")?;
        Ok(self.villages.clone())
    }

    async fn load_opponents_defeated(
        &self,
        kind: EntityKind,
    ) -> Result<HashMap<i32, OpponentsDefeated>> {
        self.check("load_opponents_defeated")?;
        Ok(match kind {
            EntityKind::Player => self.player_od.clone(),
            EntityKind::Tribe => self.tribe_od.clone(),
        })
    }

    async fn load_ennoblements(&self, since: DateTime<Utc>) -> Result<Vec<Ennoblement>> {
        self.check("load_ennoblements")?;
        self.ennoblement_requests.lock().unwrap().push(since);
        Ok(self
            .ennoblements
            .iter()
            .filter(|e| e.ennobled_at > since)
            .cloned()
            .collect())
    }

    async fn get_config(&self) -> Result<String> {
        self.check("get_config")?;
        Ok("<config/>".to_string())
    }

    async fn get_building_config(&self) -> Result<String> {
        self.check("get_building_config")?;
        Ok("<buildings/>".to_string())
    }

    async fn get_unit_config(&self) -> Result<String> {
        self.check("get_unit_config")?;
        Ok("<units/>".to_string())
    }
}

// ---------------------------------------------------------------------------
// MockDirectory / MockLoaders
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDirectory {
    listings: HashMap<String, Vec<ServerListing>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_host(mut self, host: &str, keys: &[&str]) -> Self {
        let listings = keys
            .iter()
            .map(|key| ServerListing {
                key: key.to_string(),
                url: format!("https://{key}.{host}"),
            })
            .collect();
        self.listings.insert(host.to_string(), listings);
        self
    }
}

#[async_trait]
impl DirectoryLoader for MockDirectory {
    async fn load_servers(&self, host: &str) -> Result<Vec<ServerListing>> {
        match self.listings.get(host) {
            Some(listings) => Ok(listings.clone()),
            None => bail!("MockDirectory: no listing registered for {host}"),
        }
    }
}

/// URL → loader. Unregistered URLs get an unreachable world.
#[derive(Default, Clone)]
pub struct MockLoaders {
    worlds: HashMap<String, Arc<MockLoader>>,
    directory: Arc<MockDirectory>,
}

impl MockLoaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_world(mut self, url: &str, loader: MockLoader) -> Self {
        self.worlds.insert(url.to_string(), Arc::new(loader));
        self
    }

    pub fn with_directory(mut self, directory: MockDirectory) -> Self {
        self.directory = Arc::new(directory);
        self
    }

    pub fn loader(&self, url: &str) -> Option<Arc<MockLoader>> {
        self.worlds.get(url).cloned()
    }
}

impl LoaderFactory for MockLoaders {
    fn world(&self, url: &str) -> Arc<dyn SnapshotLoader> {
        match self.worlds.get(url) {
            Some(loader) => loader.clone(),
            None => Arc::new(MockLoader::unreachable()),
        }
    }

    fn directory(&self) -> Arc<dyn DirectoryLoader> {
        self.directory.clone()
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn version(code: &str, timezone: &str) -> Version {
    Version {
        code: code.to_string(),
        name: code.to_uppercase(),
        host: format!("{code}.example.net"),
        timezone: timezone.to_string(),
        special_servers: vec![],
    }
}

pub fn server(key: &str, version: &Version) -> Server {
    Server::open(key, version.clone())
}

pub fn player(id: i32, tribe_id: i32, points: i32, villages: i32) -> Player {
    Player {
        id,
        name: format!("player {id}"),
        tribe_id,
        total_villages: villages,
        points,
        rank: id,
        daily_growth: 0,
        state: EntityState::Active,
        deleted_at: None,
        opponents_defeated: OpponentsDefeated::default(),
    }
}

pub fn tribe(id: i32, points: i32, villages: i32) -> Tribe {
    Tribe {
        id,
        name: format!("tribe {id}"),
        tag: format!("T{id}"),
        total_members: 1,
        total_villages: villages,
        points,
        all_points: points,
        rank: id,
        dominance: 0.0,
        state: EntityState::Active,
        deleted_at: None,
        opponents_defeated: OpponentsDefeated::default(),
    }
}

pub fn village(id: i32, player_id: i32) -> Village {
    Village {
        id,
        name: format!("village {id}"),
        x: id % 1000,
        y: id / 1000,
        points: 26,
        bonus: 0,
        player_id,
    }
}

pub fn ennoblement(village_id: i32, new_owner_id: i32, at: DateTime<Utc>) -> Ennoblement {
    Ennoblement {
        village_id,
        new_owner_id,
        new_owner_tribe_id: 0,
        old_owner_id: 0,
        old_owner_tribe_id: 0,
        ennobled_at: at,
    }
}
