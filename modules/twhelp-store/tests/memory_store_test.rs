//! MemoryStore behavior the sync jobs rely on.

use chrono::{NaiveDate, TimeZone, Utc};
use twhelp_common::{
    Ennoblement, EntityState, OpponentsDefeated, Player, PlayerHistory, PlayerToServer, Server,
    ServerDataUpdate, ServerStatus, Version,
};
use twhelp_store::{MemoryStore, ServerFilter, ServerTimestamp, Store, VillageFilter};

fn version(code: &str, timezone: &str) -> Version {
    Version {
        code: code.to_string(),
        name: code.to_uppercase(),
        host: format!("{code}.example.net"),
        timezone: timezone.to_string(),
        special_servers: vec![],
    }
}

fn player(id: i32) -> Player {
    Player {
        id,
        name: format!("player {id}"),
        tribe_id: 0,
        total_villages: 1,
        points: 100,
        rank: id,
        daily_growth: 0,
        state: EntityState::Active,
        deleted_at: None,
        opponents_defeated: OpponentsDefeated::default(),
    }
}

fn history(player_id: i32, date: NaiveDate, points: i32) -> PlayerHistory {
    PlayerHistory {
        player_id,
        tribe_id: 0,
        total_villages: 1,
        points,
        rank: 1,
        create_date: date,
        opponents_defeated: OpponentsDefeated::default(),
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn store_with_server(key: &str) -> MemoryStore {
    let store = MemoryStore::new();
    let v = version("en", "Europe/London");
    store.insert_version(v.clone());
    store.insert_server(Server::open(key, v));
    store
}

// =========================================================================
// Transactions
// =========================================================================

#[tokio::test]
async fn overlapping_transactions_on_different_tables_both_land() {
    let store = store_with_server("en1");

    let mut sync = store.begin("en1").await.unwrap();
    let mut conquests = store.begin("en1").await.unwrap();

    conquests
        .insert_ennoblements(&[Ennoblement {
            village_id: 7,
            new_owner_id: 1,
            new_owner_tribe_id: 0,
            old_owner_id: 0,
            old_owner_tribe_id: 0,
            ennobled_at: Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap(),
        }])
        .await
        .unwrap();
    conquests.commit().await.unwrap();

    sync.upsert_players(&[player(1)]).await.unwrap();
    sync.commit().await.unwrap();

    let partition = store.partition("en1").unwrap();
    assert_eq!(partition.ennoblements.len(), 1);
    assert!(partition.players.contains_key(&1));
}

#[tokio::test]
async fn dropped_transaction_discards_writes() {
    let store = store_with_server("en1");

    {
        let mut tx = store.begin("en1").await.unwrap();
        tx.upsert_players(&[player(1)]).await.unwrap();
    }

    assert!(store.partition("en1").unwrap().players.is_empty());
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn committed_transaction_is_visible() {
    let store = store_with_server("en1");

    let mut tx = store.begin("en1").await.unwrap();
    tx.upsert_players(&[player(1), player(2)]).await.unwrap();
    tx.associate_players(&[PlayerToServer {
        player_id: 1,
        server_key: "en1".into(),
    }])
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let partition = store.partition("en1").unwrap();
    assert_eq!(partition.players.len(), 2);
    assert_eq!(store.player_servers(), vec![(1, "en1".to_string())]);
}

#[tokio::test]
async fn begin_requires_a_provisioned_partition() {
    let store = MemoryStore::new();
    assert!(store.begin("missing").await.is_err());

    store.provision_partition("missing").await.unwrap();
    assert!(store.begin("missing").await.is_ok());
}

#[tokio::test]
async fn injected_failure_surfaces_as_error() {
    let store = store_with_server("en1");
    store.fail_on("upsert_villages");

    let mut tx = store.begin("en1").await.unwrap();
    assert!(tx.upsert_villages(&[]).await.is_err());
    assert!(tx.upsert_players(&[player(1)]).await.is_ok());
}

// =========================================================================
// Partition reads and writes
// =========================================================================

#[tokio::test]
async fn deactivating_players_clears_their_tribe() {
    let store = store_with_server("en1");
    let mut member = player(7);
    member.tribe_id = 3;
    store.seed_partition("en1", |p| {
        p.players.insert(7, member);
    });

    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let mut tx = store.begin("en1").await.unwrap();
    assert_eq!(tx.deactivate_players(&[7, 99], at).await.unwrap(), 1);
    assert!(tx.active_player_ids().await.unwrap().is_empty());
    assert_eq!(tx.count_players(EntityState::Inactive).await.unwrap(), 1);
    tx.commit().await.unwrap();

    let stored = &store.partition("en1").unwrap().players[&7];
    assert_eq!(stored.state, EntityState::Inactive);
    assert_eq!(stored.tribe_id, 0);
    assert_eq!(stored.deleted_at, Some(at));
}

#[tokio::test]
async fn latest_history_is_strictly_before_the_given_date() {
    let store = store_with_server("en1");
    store.seed_partition("en1", |p| {
        p.players.insert(1, player(1));
        p.player_history.insert((1, date(2026, 3, 1)), history(1, date(2026, 3, 1), 500));
        p.player_history.insert((1, date(2026, 3, 2)), history(1, date(2026, 3, 2), 600));
        p.player_history.insert((1, date(2026, 3, 3)), history(1, date(2026, 3, 3), 700));
    });

    let mut tx = store.begin("en1").await.unwrap();
    let rows = tx.latest_player_history(date(2026, 3, 3)).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].points, 600);
}

#[tokio::test]
async fn history_insert_ignores_existing_dates() {
    let store = store_with_server("en1");
    let day = date(2026, 3, 1);

    let mut tx = store.begin("en1").await.unwrap();
    assert_eq!(tx.insert_player_history(&[history(1, day, 10)]).await.unwrap(), 1);
    assert_eq!(tx.insert_player_history(&[history(1, day, 20)]).await.unwrap(), 0);
    tx.commit().await.unwrap();

    let partition = store.partition("en1").unwrap();
    assert_eq!(partition.player_history[&(1, day)].points, 10);
}

#[tokio::test]
async fn village_counts_follow_filters() {
    use twhelp_common::Village;

    let village = |id, player_id, bonus| Village {
        id,
        name: format!("v{id}"),
        x: 500,
        y: 500,
        points: 26,
        bonus,
        player_id,
    };
    let store = store_with_server("en1");
    store.seed_partition("en1", |p| {
        p.villages.insert(1, village(1, 0, 0));
        p.villages.insert(2, village(2, 0, 4));
        p.villages.insert(3, village(3, 9, 0));
    });

    let mut tx = store.begin("en1").await.unwrap();
    assert_eq!(tx.count_villages(VillageFilter::All).await.unwrap(), 3);
    assert_eq!(tx.count_villages(VillageFilter::Barbarian).await.unwrap(), 2);
    assert_eq!(tx.count_villages(VillageFilter::Bonus).await.unwrap(), 1);
    assert_eq!(tx.count_villages(VillageFilter::PlayerOwned).await.unwrap(), 1);
}

// =========================================================================
// Server rows
// =========================================================================

#[tokio::test]
async fn server_updates_land_on_commit() {
    let store = store_with_server("en1");
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    let mut tx = store.begin("en1").await.unwrap();
    tx.update_server_data(&ServerDataUpdate {
        data_updated_at: at,
        config: "<config/>".into(),
        building_config: "<buildings/>".into(),
        unit_config: "<units/>".into(),
        number_of_players: 2,
        number_of_tribes: 1,
        number_of_villages: 5,
    })
    .await
    .unwrap();
    tx.touch_server(ServerTimestamp::History, at).await.unwrap();
    assert!(store.server("en1").unwrap().data_updated_at.is_none());
    tx.commit().await.unwrap();

    let server = store.server("en1").unwrap();
    assert_eq!(server.data_updated_at, Some(at));
    assert_eq!(server.history_updated_at, Some(at));
    assert_eq!(server.number_of_villages, 5);
    assert_eq!(store.blobs("en1").unwrap().unit_config, "<units/>");
}

#[tokio::test]
async fn unlisted_servers_of_the_version_are_closed() {
    let store = MemoryStore::new();
    let en = version("en", "Europe/London");
    let pl = version("pl", "Europe/Warsaw");
    store.insert_version(en.clone());
    store.insert_version(pl.clone());
    store.insert_server(Server::open("en1", en.clone()));
    store.insert_server(Server::open("en2", en.clone()));
    store.insert_server(Server::open("pl1", pl));

    let closed = store
        .close_unlisted_servers("en", &["en2".to_string()])
        .await
        .unwrap();

    assert_eq!(closed, 1);
    assert_eq!(store.server("en1").unwrap().status, ServerStatus::Closed);
    assert!(store.server("en2").unwrap().is_open());
    assert!(store.server("pl1").unwrap().is_open());

    store
        .upsert_open_servers(&[Server::open("en1", en)])
        .await
        .unwrap();
    assert!(store.server("en1").unwrap().is_open());

    let warsaw = store
        .servers(&ServerFilter::open().with_timezone("Europe/Warsaw"))
        .await
        .unwrap();
    assert_eq!(warsaw.len(), 1);
    assert_eq!(warsaw[0].key, "pl1");
}
