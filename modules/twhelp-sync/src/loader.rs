//! Upstream data seams.
//!
//! `SnapshotLoader` reads one world, `DirectoryLoader` lists a version's worlds.
//! Both are implemented for the `tw-client` HTTP clients; tests swap in the
//! mocks from `testing`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tw_client::{
    ConquerRecord, DirectoryClient, KillBoard, PlayerRecord, TribeRecord, VillageRecord,
    WorldClient,
};
use twhelp_common::{
    Ennoblement, EntityKind, EntityState, OpponentsDefeated, Player, Tribe, Village,
};

pub use tw_client::ServerListing;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load_players(&self) -> Result<Vec<Player>>;

    async fn load_tribes(&self) -> Result<Vec<Tribe>>;

    async fn load_villages(&self) -> Result<Vec<Village>>;

    /// Opponents-defeated counters by entity id, from all four boards.
    async fn load_opponents_defeated(
        &self,
        kind: EntityKind,
    ) -> Result<HashMap<i32, OpponentsDefeated>>;

    /// Conquers newer than `since`.
    async fn load_ennoblements(&self, since: DateTime<Utc>) -> Result<Vec<Ennoblement>>;

    async fn get_config(&self) -> Result<String>;

    async fn get_building_config(&self) -> Result<String>;

    async fn get_unit_config(&self) -> Result<String>;
}

#[async_trait]
pub trait DirectoryLoader: Send + Sync {
    async fn load_servers(&self, host: &str) -> Result<Vec<ServerListing>>;
}

/// Hands out loaders by world URL.
pub trait LoaderFactory: Send + Sync {
    fn world(&self, url: &str) -> Arc<dyn SnapshotLoader>;

    fn directory(&self) -> Arc<dyn DirectoryLoader>;
}

// ---------------------------------------------------------------------------
// tw-client adapters
// ---------------------------------------------------------------------------

#[async_trait]
impl SnapshotLoader for WorldClient {
    async fn load_players(&self) -> Result<Vec<Player>> {
        Ok(WorldClient::load_players(self)
            .await?
            .into_iter()
            .map(player_from_record)
            .collect())
    }

    async fn load_tribes(&self) -> Result<Vec<Tribe>> {
        Ok(WorldClient::load_tribes(self)
            .await?
            .into_iter()
            .map(tribe_from_record)
            .collect())
    }

    async fn load_villages(&self) -> Result<Vec<Village>> {
        Ok(WorldClient::load_villages(self)
            .await?
            .into_iter()
            .map(village_from_record)
            .collect())
    }

    async fn load_opponents_defeated(
        &self,
        kind: EntityKind,
    ) -> Result<HashMap<i32, OpponentsDefeated>> {
        let tribes = kind == EntityKind::Tribe;
        let mut od: HashMap<i32, OpponentsDefeated> = HashMap::new();

        for board in KillBoard::ALL {
            for record in self.load_kills(board, tribes).await? {
                let entry = od.entry(record.id).or_default();
                let (rank, score) = match board {
                    KillBoard::Attack => (&mut entry.rank_att, &mut entry.score_att),
                    KillBoard::Defense => (&mut entry.rank_def, &mut entry.score_def),
                    KillBoard::Support => (&mut entry.rank_sup, &mut entry.score_sup),
                    KillBoard::Total => (&mut entry.rank_total, &mut entry.score_total),
                };
                *rank = record.rank;
                *score = record.score;
            }
        }

        Ok(od)
    }

    async fn load_ennoblements(&self, since: DateTime<Utc>) -> Result<Vec<Ennoblement>> {
        Ok(self
            .load_conquers(since)
            .await?
            .into_iter()
            .map(ennoblement_from_record)
            .collect())
    }

    async fn get_config(&self) -> Result<String> {
        Ok(WorldClient::get_config(self).await?)
    }

    async fn get_building_config(&self) -> Result<String> {
        Ok(WorldClient::get_building_config(self).await?)
    }

    async fn get_unit_config(&self) -> Result<String> {
        Ok(WorldClient::get_unit_config(self).await?)
    }
}

#[async_trait]
impl DirectoryLoader for DirectoryClient {
    async fn load_servers(&self, host: &str) -> Result<Vec<ServerListing>> {
        Ok(DirectoryClient::load_servers(self, host).await?)
    }
}

/// Production factory. All loaders share one HTTP connection pool.
#[derive(Clone)]
pub struct HttpLoaders {
    client: reqwest::Client,
    directory: Arc<DirectoryClient>,
}

impl HttpLoaders {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            directory: Arc::new(DirectoryClient::with_client(client.clone())),
            client,
        }
    }
}

impl LoaderFactory for HttpLoaders {
    fn world(&self, url: &str) -> Arc<dyn SnapshotLoader> {
        Arc::new(WorldClient::with_client(self.client.clone(), url))
    }

    fn directory(&self) -> Arc<dyn DirectoryLoader> {
        self.directory.clone()
    }
}

// ---------------------------------------------------------------------------
// Record conversion
// ---------------------------------------------------------------------------

fn player_from_record(r: PlayerRecord) -> Player {
    Player {
        id: r.id,
        name: r.name,
        tribe_id: r.tribe_id,
        total_villages: r.villages,
        points: r.points,
        rank: r.rank,
        daily_growth: 0,
        state: EntityState::Active,
        deleted_at: None,
        opponents_defeated: OpponentsDefeated::default(),
    }
}

fn tribe_from_record(r: TribeRecord) -> Tribe {
    Tribe {
        id: r.id,
        name: r.name,
        tag: r.tag,
        total_members: r.members,
        total_villages: r.villages,
        points: r.points,
        all_points: r.all_points,
        rank: r.rank,
        dominance: 0.0,
        state: EntityState::Active,
        deleted_at: None,
        opponents_defeated: OpponentsDefeated::default(),
    }
}

fn village_from_record(r: VillageRecord) -> Village {
    Village {
        id: r.id,
        name: r.name,
        x: r.x,
        y: r.y,
        points: r.points,
        bonus: r.bonus,
        player_id: r.player_id,
    }
}

fn ennoblement_from_record(r: ConquerRecord) -> Ennoblement {
    Ennoblement {
        village_id: r.village_id,
        new_owner_id: r.new_owner_id,
        new_owner_tribe_id: r.new_owner_tribe_id,
        old_owner_id: r.old_owner_id,
        old_owner_tribe_id: r.old_owner_tribe_id,
        ennobled_at: r.ennobled_at,
    }
}
