//! Postgres-backed store.
//!
//! Every server owns one schema named after its key. A partition-scoped
//! transaction pins `search_path` to that schema, so the statements below
//! never name it. Shared tables live in `public` and are always qualified.
//!
//! Bulk writes bind one array per column and expand them with `UNNEST`, which
//! keeps a 20k-row player snapshot inside a single statement.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};
use twhelp_common::{
    DailyPlayerStats, DailyTribeStats, Ennoblement, EntityState, OpponentsDefeated, Player,
    PlayerHistory, PlayerToServer, Server, ServerDataUpdate, ServerStats, Tribe, TribeHistory,
    Version, Village,
};

use crate::traits::{ServerFilter, ServerTimestamp, Store, StoreTx, VillageFilter};

const PUBLIC_SCHEMA: &str = include_str!("../sql/public_schema.sql");
const SERVER_SCHEMA: &str = include_str!("../sql/server_schema.sql");

const OD_SET: &str = "rank_att = EXCLUDED.rank_att, score_att = EXCLUDED.score_att, \
    rank_def = EXCLUDED.rank_def, score_def = EXCLUDED.score_def, \
    rank_sup = EXCLUDED.rank_sup, score_sup = EXCLUDED.score_sup, \
    rank_total = EXCLUDED.rank_total, score_total = EXCLUDED.score_total";

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the shared tables (versions, servers, player links).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(PUBLIC_SCHEMA)
            .execute(&self.pool)
            .await
            .context("couldn't create the public tables")?;
        Ok(())
    }
}

/// Server keys become schema names, so only `[a-z0-9_]` is accepted.
fn schema_ident(server_key: &str) -> Result<String> {
    let valid = !server_key.is_empty()
        && server_key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        bail!("invalid server key {server_key:?}: expected [a-z0-9_]+");
    }
    Ok(format!("\"{server_key}\""))
}

#[async_trait]
impl Store for PgStore {
    async fn versions(&self) -> Result<Vec<Version>> {
        sqlx::query_as::<_, Version>(
            "SELECT code, name, host, timezone, special_servers FROM public.versions ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .context("couldn't load versions")
    }

    async fn servers(&self, filter: &ServerFilter) -> Result<Vec<Server>> {
        sqlx::query_as::<_, Server>(
            r#"
            SELECT s.key, s.status, s.version_code,
                   s.number_of_players, s.number_of_tribes, s.number_of_villages,
                   s.data_updated_at, s.history_updated_at, s.stats_updated_at,
                   s.ennoblements_updated_at,
                   v.code, v.name, v.host, v.timezone, v.special_servers
            FROM public.servers s
            JOIN public.versions v ON v.code = s.version_code
            WHERE ($1::text IS NULL OR s.status = $1)
              AND ($2::text IS NULL OR s.version_code = $2)
              AND ($3::text IS NULL OR v.timezone = $3)
            ORDER BY s.key
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.version_code.as_deref())
        .bind(filter.timezone.as_deref())
        .fetch_all(&self.pool)
        .await
        .context("couldn't load servers")
    }

    async fn provision_partition(&self, server_key: &str) -> Result<()> {
        let schema = schema_ident(server_key)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("couldn't create schema {schema}"))?;
        sqlx::query(&format!("SET LOCAL search_path TO {schema}"))
            .execute(&mut *tx)
            .await?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(SERVER_SCHEMA))
            .await
            .with_context(|| format!("couldn't create tables in schema {schema}"))?;

        tx.commit().await?;
        tracing::debug!(server_key, "Server schema ready");
        Ok(())
    }

    async fn upsert_open_servers(&self, servers: &[Server]) -> Result<u64> {
        if servers.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = servers.iter().map(|s| s.key.clone()).collect();
        let versions: Vec<String> = servers.iter().map(|s| s.version_code.clone()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO public.servers (key, status, version_code)
            SELECT key, 'open', version_code
            FROM UNNEST($1::text[], $2::text[]) AS t(key, version_code)
            ON CONFLICT (key) DO UPDATE
            SET status = 'open', version_code = EXCLUDED.version_code
            "#,
        )
        .bind(keys)
        .bind(versions)
        .execute(&self.pool)
        .await
        .context("couldn't insert/update servers")?;

        Ok(result.rows_affected())
    }

    async fn close_unlisted_servers(&self, version_code: &str, listed: &[String]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE public.servers
            SET status = 'closed'
            WHERE version_code = $1 AND NOT (key = ANY($2)) AND status <> 'closed'
            "#,
        )
        .bind(version_code)
        .bind(listed)
        .execute(&self.pool)
        .await
        .context("couldn't update server statuses")?;

        Ok(result.rows_affected())
    }

    async fn begin(&self, server_key: &str) -> Result<Box<dyn StoreTx>> {
        let schema = schema_ident(server_key)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("couldn't begin a transaction")?;

        sqlx::query(&format!("SET LOCAL search_path TO {schema}, public"))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("couldn't scope the transaction to {schema}"))?;

        Ok(Box::new(PgTx {
            server_key: server_key.to_string(),
            tx,
        }))
    }
}

// ---------------------------------------------------------------------------
// PgTx
// ---------------------------------------------------------------------------

pub struct PgTx {
    server_key: String,
    tx: Transaction<'static, Postgres>,
}

/// Opponents-defeated counters split into one array per column.
#[derive(Default)]
struct OdColumns {
    rank_att: Vec<i32>,
    score_att: Vec<i32>,
    rank_def: Vec<i32>,
    score_def: Vec<i32>,
    rank_sup: Vec<i32>,
    score_sup: Vec<i32>,
    rank_total: Vec<i32>,
    score_total: Vec<i32>,
}

impl OdColumns {
    fn collect<'a>(items: impl IntoIterator<Item = &'a OpponentsDefeated>) -> Self {
        let mut cols = Self::default();
        for od in items {
            cols.rank_att.push(od.rank_att);
            cols.score_att.push(od.score_att);
            cols.rank_def.push(od.rank_def);
            cols.score_def.push(od.score_def);
            cols.rank_sup.push(od.rank_sup);
            cols.score_sup.push(od.score_sup);
            cols.rank_total.push(od.rank_total);
            cols.score_total.push(od.score_total);
        }
        cols
    }

    fn bind(self, query: Query<'_, Postgres, PgArguments>) -> Query<'_, Postgres, PgArguments> {
        query
            .bind(self.rank_att)
            .bind(self.score_att)
            .bind(self.rank_def)
            .bind(self.score_def)
            .bind(self.rank_sup)
            .bind(self.score_sup)
            .bind(self.rank_total)
            .bind(self.score_total)
    }
}

fn ids<T>(items: &[T], id: impl Fn(&T) -> i32) -> Vec<i32> {
    items.iter().map(id).collect()
}

#[async_trait]
impl StoreTx for PgTx {
    fn server_key(&self) -> &str {
        &self.server_key
    }

    // --- Reads ---

    async fn active_player_ids(&mut self) -> Result<Vec<i32>> {
        sqlx::query_scalar::<_, i32>(r#"SELECT id FROM players WHERE "exists" = true ORDER BY id"#)
            .fetch_all(&mut *self.tx)
            .await
            .context("couldn't load active player ids")
    }

    async fn active_players(&mut self) -> Result<Vec<Player>> {
        sqlx::query_as::<_, Player>(r#"SELECT * FROM players WHERE "exists" = true ORDER BY id"#)
            .fetch_all(&mut *self.tx)
            .await
            .context("couldn't load players")
    }

    async fn active_tribes(&mut self) -> Result<Vec<Tribe>> {
        sqlx::query_as::<_, Tribe>(r#"SELECT * FROM tribes WHERE "exists" = true ORDER BY id"#)
            .fetch_all(&mut *self.tx)
            .await
            .context("couldn't load tribes")
    }

    async fn first_ennoblements(&mut self) -> Result<Vec<Ennoblement>> {
        sqlx::query_as::<_, Ennoblement>(
            r#"
            SELECT DISTINCT ON (new_owner_id)
                   village_id, new_owner_id, new_owner_tribe_id,
                   old_owner_id, old_owner_tribe_id, ennobled_at
            FROM ennoblements
            ORDER BY new_owner_id ASC, ennobled_at ASC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .context("couldn't load ennoblements")
    }

    async fn latest_ennoblement_at(&mut self) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>("SELECT MAX(ennobled_at) FROM ennoblements")
            .fetch_one(&mut *self.tx)
            .await
            .context("couldn't load the latest ennoblement")
    }

    async fn latest_player_history(&mut self, before: NaiveDate) -> Result<Vec<PlayerHistory>> {
        sqlx::query_as::<_, PlayerHistory>(
            r#"
            SELECT DISTINCT ON (h.player_id) h.*
            FROM player_history h
            JOIN players p ON p.id = h.player_id
            WHERE p."exists" = true AND h.create_date < $1
            ORDER BY h.player_id ASC, h.create_date DESC
            "#,
        )
        .bind(before)
        .fetch_all(&mut *self.tx)
        .await
        .context("couldn't select player history records")
    }

    async fn latest_tribe_history(&mut self, before: NaiveDate) -> Result<Vec<TribeHistory>> {
        sqlx::query_as::<_, TribeHistory>(
            r#"
            SELECT DISTINCT ON (h.tribe_id) h.*
            FROM tribe_history h
            JOIN tribes t ON t.id = h.tribe_id
            WHERE t."exists" = true AND h.create_date < $1
            ORDER BY h.tribe_id ASC, h.create_date DESC
            "#,
        )
        .bind(before)
        .fetch_all(&mut *self.tx)
        .await
        .context("couldn't select tribe history records")
    }

    async fn count_players(&mut self, state: EntityState) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*) FROM players WHERE "exists" = $1"#)
            .bind(state.as_exists())
            .fetch_one(&mut *self.tx)
            .await
            .with_context(|| format!("couldn't count {state:?} players"))
    }

    async fn count_tribes(&mut self, state: EntityState) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*) FROM tribes WHERE "exists" = $1"#)
            .bind(state.as_exists())
            .fetch_one(&mut *self.tx)
            .await
            .with_context(|| format!("couldn't count {state:?} tribes"))
    }

    async fn count_villages(&mut self, filter: VillageFilter) -> Result<i64> {
        let sql = match filter {
            VillageFilter::All => "SELECT COUNT(*) FROM villages",
            VillageFilter::Barbarian => "SELECT COUNT(*) FROM villages WHERE player_id = 0",
            VillageFilter::Bonus => "SELECT COUNT(*) FROM villages WHERE bonus <> 0",
            VillageFilter::PlayerOwned => "SELECT COUNT(*) FROM villages WHERE player_id <> 0",
        };
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&mut *self.tx)
            .await
            .with_context(|| format!("couldn't count {filter:?} villages"))
    }

    async fn village_ids(&mut self) -> Result<Vec<i32>> {
        sqlx::query_scalar::<_, i32>("SELECT id FROM villages ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await
            .context("couldn't load village ids")
    }

    // --- Current state ---

    async fn upsert_tribes(&mut self, tribes: &[Tribe]) -> Result<u64> {
        if tribes.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            INSERT INTO tribes (id, name, tag, total_members, total_villages, points, all_points,
                                rank, dominance, "exists", deleted_at,
                                rank_att, score_att, rank_def, score_def,
                                rank_sup, score_sup, rank_total, score_total)
            SELECT id, name, tag, total_members, total_villages, points, all_points,
                   rank, dominance, "exists", NULL,
                   rank_att, score_att, rank_def, score_def,
                   rank_sup, score_sup, rank_total, score_total
            FROM UNNEST($1::int[], $2::text[], $3::text[], $4::int[], $5::int[], $6::int[],
                        $7::int[], $8::int[], $9::float8[], $10::bool[],
                        $11::int[], $12::int[], $13::int[], $14::int[],
                        $15::int[], $16::int[], $17::int[], $18::int[])
                 AS t(id, name, tag, total_members, total_villages, points, all_points,
                      rank, dominance, "exists",
                      rank_att, score_att, rank_def, score_def,
                      rank_sup, score_sup, rank_total, score_total)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                tag = EXCLUDED.tag,
                total_members = EXCLUDED.total_members,
                total_villages = EXCLUDED.total_villages,
                points = EXCLUDED.points,
                all_points = EXCLUDED.all_points,
                rank = EXCLUDED.rank,
                "exists" = EXCLUDED."exists",
                dominance = EXCLUDED.dominance,
                deleted_at = NULL,
                {OD_SET}
            "#
        );

        let query = sqlx::query(&sql)
            .bind(ids(tribes, |t| t.id))
            .bind(tribes.iter().map(|t| t.name.clone()).collect::<Vec<_>>())
            .bind(tribes.iter().map(|t| t.tag.clone()).collect::<Vec<_>>())
            .bind(ids(tribes, |t| t.total_members))
            .bind(ids(tribes, |t| t.total_villages))
            .bind(ids(tribes, |t| t.points))
            .bind(ids(tribes, |t| t.all_points))
            .bind(ids(tribes, |t| t.rank))
            .bind(tribes.iter().map(|t| t.dominance).collect::<Vec<_>>())
            .bind(tribes.iter().map(|t| t.state.as_exists()).collect::<Vec<_>>());
        let result = OdColumns::collect(tribes.iter().map(|t| &t.opponents_defeated))
            .bind(query)
            .execute(&mut *self.tx)
            .await
            .context("couldn't insert tribes")?;

        Ok(result.rows_affected())
    }

    async fn deactivate_missing_tribes(&mut self, present: &[i32], at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tribes
            SET "exists" = false, deleted_at = $2, dominance = 0
            WHERE "exists" = true AND NOT (id = ANY($1))
            "#,
        )
        .bind(present)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .context("couldn't update non-existent tribes")?;

        Ok(result.rows_affected())
    }

    async fn upsert_players(&mut self, players: &[Player]) -> Result<u64> {
        if players.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            INSERT INTO players (id, name, tribe_id, total_villages, points, rank, daily_growth,
                                 "exists", deleted_at,
                                 rank_att, score_att, rank_def, score_def,
                                 rank_sup, score_sup, rank_total, score_total)
            SELECT id, name, tribe_id, total_villages, points, rank, daily_growth,
                   "exists", NULL,
                   rank_att, score_att, rank_def, score_def,
                   rank_sup, score_sup, rank_total, score_total
            FROM UNNEST($1::int[], $2::text[], $3::int[], $4::int[], $5::int[], $6::int[],
                        $7::int[], $8::bool[],
                        $9::int[], $10::int[], $11::int[], $12::int[],
                        $13::int[], $14::int[], $15::int[], $16::int[])
                 AS t(id, name, tribe_id, total_villages, points, rank, daily_growth, "exists",
                      rank_att, score_att, rank_def, score_def,
                      rank_sup, score_sup, rank_total, score_total)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                total_villages = EXCLUDED.total_villages,
                points = EXCLUDED.points,
                rank = EXCLUDED.rank,
                "exists" = EXCLUDED."exists",
                tribe_id = EXCLUDED.tribe_id,
                daily_growth = EXCLUDED.daily_growth,
                deleted_at = NULL,
                {OD_SET}
            "#
        );

        let query = sqlx::query(&sql)
            .bind(ids(players, |p| p.id))
            .bind(players.iter().map(|p| p.name.clone()).collect::<Vec<_>>())
            .bind(ids(players, |p| p.tribe_id))
            .bind(ids(players, |p| p.total_villages))
            .bind(ids(players, |p| p.points))
            .bind(ids(players, |p| p.rank))
            .bind(ids(players, |p| p.daily_growth))
            .bind(players.iter().map(|p| p.state.as_exists()).collect::<Vec<_>>());
        let result = OdColumns::collect(players.iter().map(|p| &p.opponents_defeated))
            .bind(query)
            .execute(&mut *self.tx)
            .await
            .context("couldn't insert players")?;

        Ok(result.rows_affected())
    }

    async fn deactivate_players(&mut self, ids: &[i32], at: DateTime<Utc>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE players
            SET "exists" = false, tribe_id = 0, deleted_at = $2
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .context("couldn't mark players as deleted")?;

        Ok(result.rows_affected())
    }

    async fn associate_players(&mut self, links: &[PlayerToServer]) -> Result<u64> {
        if links.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO public.player_to_servers (player_id, server_key)
            SELECT player_id, server_key
            FROM UNNEST($1::int[], $2::text[]) AS t(player_id, server_key)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(ids(links, |l| l.player_id))
        .bind(links.iter().map(|l| l.server_key.clone()).collect::<Vec<_>>())
        .execute(&mut *self.tx)
        .await
        .context("couldn't associate players with the server")?;

        Ok(result.rows_affected())
    }

    async fn upsert_villages(&mut self, villages: &[Village]) -> Result<u64> {
        if villages.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO villages (id, name, x, y, points, bonus, player_id)
            SELECT * FROM UNNEST($1::int[], $2::text[], $3::int[], $4::int[],
                                 $5::int[], $6::int[], $7::int[])
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                points = EXCLUDED.points,
                x = EXCLUDED.x,
                y = EXCLUDED.y,
                bonus = EXCLUDED.bonus,
                player_id = EXCLUDED.player_id
            "#,
        )
        .bind(ids(villages, |v| v.id))
        .bind(villages.iter().map(|v| v.name.clone()).collect::<Vec<_>>())
        .bind(ids(villages, |v| v.x))
        .bind(ids(villages, |v| v.y))
        .bind(ids(villages, |v| v.points))
        .bind(ids(villages, |v| v.bonus))
        .bind(ids(villages, |v| v.player_id))
        .execute(&mut *self.tx)
        .await
        .context("couldn't insert villages")?;

        Ok(result.rows_affected())
    }

    async fn delete_villages(&mut self, ids: &[i32]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM villages WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await
            .context("couldn't delete villages")?;

        Ok(result.rows_affected())
    }

    async fn insert_ennoblements(&mut self, ennoblements: &[Ennoblement]) -> Result<u64> {
        if ennoblements.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO ennoblements (village_id, new_owner_id, new_owner_tribe_id,
                                      old_owner_id, old_owner_tribe_id, ennobled_at)
            SELECT * FROM UNNEST($1::int[], $2::int[], $3::int[], $4::int[], $5::int[],
                                 $6::timestamptz[])
            "#,
        )
        .bind(ids(ennoblements, |e| e.village_id))
        .bind(ids(ennoblements, |e| e.new_owner_id))
        .bind(ids(ennoblements, |e| e.new_owner_tribe_id))
        .bind(ids(ennoblements, |e| e.old_owner_id))
        .bind(ids(ennoblements, |e| e.old_owner_tribe_id))
        .bind(ennoblements.iter().map(|e| e.ennobled_at).collect::<Vec<_>>())
        .execute(&mut *self.tx)
        .await
        .context("couldn't insert ennoblements")?;

        Ok(result.rows_affected())
    }

    // --- History and stats ---

    async fn upsert_daily_player_stats(&mut self, stats: &[DailyPlayerStats]) -> Result<u64> {
        if stats.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            INSERT INTO daily_player_stats (player_id, villages, points, rank, create_date,
                                            rank_att, score_att, rank_def, score_def,
                                            rank_sup, score_sup, rank_total, score_total)
            SELECT * FROM UNNEST($1::int[], $2::int[], $3::int[], $4::int[], $5::date[],
                                 $6::int[], $7::int[], $8::int[], $9::int[],
                                 $10::int[], $11::int[], $12::int[], $13::int[])
            ON CONFLICT ON CONSTRAINT daily_player_stats_player_id_create_date_key DO UPDATE SET
                villages = EXCLUDED.villages,
                points = EXCLUDED.points,
                rank = EXCLUDED.rank,
                {OD_SET}
            "#
        );

        let query = sqlx::query(&sql)
            .bind(ids(stats, |s| s.player_id))
            .bind(ids(stats, |s| s.villages))
            .bind(ids(stats, |s| s.points))
            .bind(ids(stats, |s| s.rank))
            .bind(stats.iter().map(|s| s.create_date).collect::<Vec<_>>());
        let result = OdColumns::collect(stats.iter().map(|s| &s.opponents_defeated))
            .bind(query)
            .execute(&mut *self.tx)
            .await
            .context("couldn't insert today's player stats")?;

        Ok(result.rows_affected())
    }

    async fn upsert_daily_tribe_stats(&mut self, stats: &[DailyTribeStats]) -> Result<u64> {
        if stats.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            INSERT INTO daily_tribe_stats (tribe_id, members, villages, points, all_points, rank,
                                           dominance, create_date,
                                           rank_att, score_att, rank_def, score_def,
                                           rank_sup, score_sup, rank_total, score_total)
            SELECT * FROM UNNEST($1::int[], $2::int[], $3::int[], $4::int[], $5::int[], $6::int[],
                                 $7::float8[], $8::date[],
                                 $9::int[], $10::int[], $11::int[], $12::int[],
                                 $13::int[], $14::int[], $15::int[], $16::int[])
            ON CONFLICT ON CONSTRAINT daily_tribe_stats_tribe_id_create_date_key DO UPDATE SET
                members = EXCLUDED.members,
                villages = EXCLUDED.villages,
                points = EXCLUDED.points,
                all_points = EXCLUDED.all_points,
                rank = EXCLUDED.rank,
                dominance = EXCLUDED.dominance,
                {OD_SET}
            "#
        );

        let query = sqlx::query(&sql)
            .bind(ids(stats, |s| s.tribe_id))
            .bind(ids(stats, |s| s.members))
            .bind(ids(stats, |s| s.villages))
            .bind(ids(stats, |s| s.points))
            .bind(ids(stats, |s| s.all_points))
            .bind(ids(stats, |s| s.rank))
            .bind(stats.iter().map(|s| s.dominance).collect::<Vec<_>>())
            .bind(stats.iter().map(|s| s.create_date).collect::<Vec<_>>());
        let result = OdColumns::collect(stats.iter().map(|s| &s.opponents_defeated))
            .bind(query)
            .execute(&mut *self.tx)
            .await
            .context("couldn't insert today's tribe stats")?;

        Ok(result.rows_affected())
    }

    async fn insert_player_history(&mut self, rows: &[PlayerHistory]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let query = sqlx::query(
            r#"
            INSERT INTO player_history (player_id, tribe_id, total_villages, points, rank,
                                        create_date,
                                        rank_att, score_att, rank_def, score_def,
                                        rank_sup, score_sup, rank_total, score_total)
            SELECT * FROM UNNEST($1::int[], $2::int[], $3::int[], $4::int[], $5::int[],
                                 $6::date[],
                                 $7::int[], $8::int[], $9::int[], $10::int[],
                                 $11::int[], $12::int[], $13::int[], $14::int[])
            ON CONFLICT (player_id, create_date) DO NOTHING
            "#,
        )
        .bind(ids(rows, |r| r.player_id))
        .bind(ids(rows, |r| r.tribe_id))
        .bind(ids(rows, |r| r.total_villages))
        .bind(ids(rows, |r| r.points))
        .bind(ids(rows, |r| r.rank))
        .bind(rows.iter().map(|r| r.create_date).collect::<Vec<_>>());
        let result = OdColumns::collect(rows.iter().map(|r| &r.opponents_defeated))
            .bind(query)
            .execute(&mut *self.tx)
            .await
            .context("couldn't insert players history")?;

        Ok(result.rows_affected())
    }

    async fn insert_tribe_history(&mut self, rows: &[TribeHistory]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let query = sqlx::query(
            r#"
            INSERT INTO tribe_history (tribe_id, total_members, total_villages, points, all_points,
                                       rank, dominance, create_date,
                                       rank_att, score_att, rank_def, score_def,
                                       rank_sup, score_sup, rank_total, score_total)
            SELECT * FROM UNNEST($1::int[], $2::int[], $3::int[], $4::int[], $5::int[],
                                 $6::int[], $7::float8[], $8::date[],
                                 $9::int[], $10::int[], $11::int[], $12::int[],
                                 $13::int[], $14::int[], $15::int[], $16::int[])
            ON CONFLICT (tribe_id, create_date) DO NOTHING
            "#,
        )
        .bind(ids(rows, |r| r.tribe_id))
        .bind(ids(rows, |r| r.total_members))
        .bind(ids(rows, |r| r.total_villages))
        .bind(ids(rows, |r| r.points))
        .bind(ids(rows, |r| r.all_points))
        .bind(ids(rows, |r| r.rank))
        .bind(rows.iter().map(|r| r.dominance).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.create_date).collect::<Vec<_>>());
        let result = OdColumns::collect(rows.iter().map(|r| &r.opponents_defeated))
            .bind(query)
            .execute(&mut *self.tx)
            .await
            .context("couldn't insert tribes history")?;

        Ok(result.rows_affected())
    }

    async fn insert_server_stats(&mut self, stats: &ServerStats) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO stats (active_players, inactive_players, players,
                               active_tribes, inactive_tribes, tribes,
                               barbarian_villages, bonus_villages, player_villages, villages,
                               create_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (create_date) DO NOTHING
            "#,
        )
        .bind(stats.active_players)
        .bind(stats.inactive_players)
        .bind(stats.players)
        .bind(stats.active_tribes)
        .bind(stats.inactive_tribes)
        .bind(stats.tribes)
        .bind(stats.barbarian_villages)
        .bind(stats.bonus_villages)
        .bind(stats.player_villages)
        .bind(stats.villages)
        .bind(stats.create_date)
        .execute(&mut *self.tx)
        .await
        .context("couldn't insert server stats")?;

        Ok(result.rows_affected())
    }

    async fn delete_history_before(&mut self, cutoff: NaiveDate) -> Result<u64> {
        let mut deleted = 0;
        for table in [
            "player_history",
            "tribe_history",
            "daily_player_stats",
            "daily_tribe_stats",
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE create_date < $1"))
                .bind(cutoff)
                .execute(&mut *self.tx)
                .await
                .with_context(|| format!("couldn't vacuum {table}"))?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    // --- Server row ---

    async fn update_server_data(&mut self, update: &ServerDataUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE public.servers
            SET data_updated_at = $2,
                config = $3,
                building_config = $4,
                unit_config = $5,
                number_of_players = $6,
                number_of_tribes = $7,
                number_of_villages = $8
            WHERE key = $1
            "#,
        )
        .bind(&self.server_key)
        .bind(update.data_updated_at)
        .bind(&update.config)
        .bind(&update.building_config)
        .bind(&update.unit_config)
        .bind(update.number_of_players)
        .bind(update.number_of_tribes)
        .bind(update.number_of_villages)
        .execute(&mut *self.tx)
        .await
        .context("couldn't update server")?;

        if result.rows_affected() == 0 {
            bail!("server {} does not exist", self.server_key);
        }
        Ok(())
    }

    async fn touch_server(&mut self, column: ServerTimestamp, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE public.servers SET {} = $2 WHERE key = $1",
            column.column()
        ))
        .bind(&self.server_key)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .context("couldn't update server")?;

        if result.rows_affected() == 0 {
            bail!("server {} does not exist", self.server_key);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .with_context(|| format!("{}: couldn't commit the transaction", self.server_key))
    }
}
