//! End-to-end data sync against the in-memory store.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use twhelp_common::{EntityKind, EntityState, OpponentsDefeated, TribeHistory, Version};
use twhelp_store::MemoryStore;
use twhelp_sync::testing::{ennoblement, player, server, tribe, version, village, MockLoader};
use twhelp_sync::{sync_server_data, update_server_history};

const KEY: &str = "abc";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 10).unwrap()
}

fn yesterday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 9).unwrap()
}

fn warsaw() -> Version {
    version("pl", "Europe/Warsaw")
}

fn store_with_server() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_version(warsaw());
    store.insert_server(server(KEY, &warsaw()));
    store
}

/// T1 with 1200 points and 12 of the world's 100 villages.
fn abc_snapshot() -> MockLoader {
    let mut villages: Vec<_> = (1..=100).map(|id| village(id, 1)).collect();
    villages.push(village(101, 0));
    MockLoader::new()
        .with_tribes(vec![tribe(1, 1200, 12)])
        .with_players(vec![player(1, 1, 1200, 100)])
        .with_villages(villages)
}

fn tribe_history(tribe_id: i32, points: i32, date: NaiveDate) -> TribeHistory {
    TribeHistory {
        tribe_id,
        total_members: 1,
        total_villages: 10,
        points,
        all_points: points,
        rank: tribe_id,
        dominance: 10.0,
        create_date: date,
        opponents_defeated: OpponentsDefeated::default(),
    }
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn first_sync_without_history_writes_no_daily_stats() {
    let store = store_with_server();
    store.seed_partition(KEY, |p| {
        p.tribes.insert(1, tribe(1, 1000, 10));
    });

    let summary = sync_server_data(&store, &abc_snapshot(), &server(KEY, &warsaw()), now())
        .await
        .unwrap();

    let partition = store.partition(KEY).unwrap();
    let t1 = &partition.tribes[&1];
    assert_eq!(t1.points, 1200);
    assert_eq!(t1.dominance, 12.0);
    assert!(partition.daily_tribe_stats.is_empty());
    assert!(partition.daily_player_stats.is_empty());
    assert!(partition.stats.is_empty());
    assert_eq!(summary.daily_tribe_stats, 0);
    assert_eq!(summary.villages, 101);
}

#[tokio::test]
async fn sync_after_history_snapshot_diffs_against_yesterday() {
    let store = store_with_server();
    let target = server(KEY, &warsaw());
    store.seed_partition(KEY, |p| {
        p.tribes.insert(1, tribe(1, 1000, 10));
        p.tribe_history
            .insert((1, yesterday()), tribe_history(1, 1000, yesterday()));
    });

    sync_server_data(&store, &abc_snapshot(), &target, now())
        .await
        .unwrap();
    update_server_history(&store, &target, now()).await.unwrap();
    sync_server_data(&store, &abc_snapshot(), &target, now())
        .await
        .unwrap();

    let partition = store.partition(KEY).unwrap();
    assert_eq!(partition.tribe_history[&(1, today())].points, 1200);
    let stats = &partition.daily_tribe_stats[&(1, yesterday())];
    assert_eq!(stats.points, 200);
    assert_eq!(stats.villages, 2);
    assert_eq!(partition.daily_tribe_stats.len(), 1);
}

// =========================================================================
// Properties
// =========================================================================

#[tokio::test]
async fn repeated_sync_is_idempotent() {
    let store = store_with_server();
    let target = server(KEY, &warsaw());
    store.seed_partition(KEY, |p| {
        p.tribes.insert(1, tribe(1, 1000, 10));
        p.tribe_history
            .insert((1, yesterday()), tribe_history(1, 1000, yesterday()));
    });

    sync_server_data(&store, &abc_snapshot(), &target, now())
        .await
        .unwrap();
    let first = store.partition(KEY).unwrap();
    sync_server_data(&store, &abc_snapshot(), &target, now())
        .await
        .unwrap();
    let second = store.partition(KEY).unwrap();

    assert_eq!(first.players, second.players);
    assert_eq!(first.tribes, second.tribes);
    assert_eq!(first.villages, second.villages);
    assert_eq!(first.daily_tribe_stats, second.daily_tribe_stats);
    assert_eq!(first.daily_player_stats, second.daily_player_stats);
    assert_eq!(second.daily_tribe_stats.len(), 1);
    assert_eq!(store.player_servers(), vec![(1, KEY.to_string())]);
}

#[tokio::test]
async fn vanished_entities_become_inactive_and_keep_history() {
    let store = store_with_server();
    let target = server(KEY, &warsaw());

    let before = MockLoader::new()
        .with_tribes(vec![tribe(1, 500, 2), tribe(2, 400, 2)])
        .with_players(vec![player(1, 1, 500, 2), player(2, 2, 400, 2)])
        .with_villages(vec![village(1, 1), village(2, 1), village(3, 2), village(4, 2)]);
    sync_server_data(&store, &before, &target, now() - Duration::days(1))
        .await
        .unwrap();
    update_server_history(&store, &target, now() - Duration::days(1))
        .await
        .unwrap();

    let after = MockLoader::new()
        .with_tribes(vec![tribe(1, 900, 4)])
        .with_players(vec![player(1, 1, 900, 4)])
        .with_villages(vec![village(1, 1), village(2, 1), village(3, 1), village(4, 1)]);
    let summary = sync_server_data(&store, &after, &target, now())
        .await
        .unwrap();

    let partition = store.partition(KEY).unwrap();
    let gone_player = &partition.players[&2];
    assert_eq!(gone_player.state, EntityState::Inactive);
    assert_eq!(gone_player.tribe_id, 0);
    assert_eq!(gone_player.deleted_at, Some(now()));

    let gone_tribe = &partition.tribes[&2];
    assert_eq!(gone_tribe.state, EntityState::Inactive);
    assert_eq!(gone_tribe.dominance, 0.0);

    assert!(partition.player_history.contains_key(&(2, yesterday())));
    assert!(partition.tribe_history.contains_key(&(2, yesterday())));
    assert_eq!(partition.tribes[&1].dominance, 100.0);
    assert_eq!(summary.deleted_players, 1);
    assert_eq!(summary.deactivated_tribes, 1);
}

#[tokio::test]
async fn snapshot_without_tribes_deactivates_every_tribe() {
    let store = store_with_server();
    let target = server(KEY, &warsaw());
    let mut stale = tribe(1, 500, 1);
    stale.dominance = 40.0;
    store.seed_partition(KEY, |p| {
        p.tribes.insert(1, stale);
    });

    let loader = MockLoader::new()
        .with_players(vec![player(1, 0, 100, 1)])
        .with_villages(vec![village(1, 1)]);
    let summary = sync_server_data(&store, &loader, &target, now())
        .await
        .unwrap();

    let stale = &store.partition(KEY).unwrap().tribes[&1];
    assert_eq!(stale.state, EntityState::Inactive);
    assert_eq!(stale.dominance, 0.0);
    assert_eq!(stale.deleted_at, Some(now()));
    assert_eq!(summary.deactivated_tribes, 1);
}

#[tokio::test]
async fn reappearing_player_is_reactivated() {
    let store = store_with_server();
    let target = server(KEY, &warsaw());
    let mut gone = player(3, 0, 10, 1);
    gone.state = EntityState::Inactive;
    gone.deleted_at = Some(now() - Duration::days(3));
    store.seed_partition(KEY, |p| {
        p.players.insert(3, gone);
    });

    let loader = MockLoader::new()
        .with_players(vec![player(3, 0, 50, 1)])
        .with_villages(vec![village(1, 3)]);
    sync_server_data(&store, &loader, &target, now()).await.unwrap();

    let back = &store.partition(KEY).unwrap().players[&3];
    assert_eq!(back.state, EntityState::Active);
    assert_eq!(back.deleted_at, None);
}

#[tokio::test]
async fn growth_is_measured_from_the_first_conquest() {
    let store = store_with_server();
    let target = server(KEY, &warsaw());
    store.seed_partition(KEY, |p| {
        p.ennoblements = vec![
            ennoblement(10, 1, now() - Duration::days(2)),
            ennoblement(11, 1, now() - Duration::days(5)),
            ennoblement(12, 2, now() - Duration::hours(3)),
        ];
    });

    let loader = MockLoader::new()
        .with_players(vec![
            player(1, 0, 100, 2),
            player(2, 0, 300, 1),
            player(3, 0, 999, 1),
        ])
        .with_villages(vec![village(10, 1), village(11, 1), village(12, 2)]);
    sync_server_data(&store, &loader, &target, now()).await.unwrap();

    let players = store.partition(KEY).unwrap().players;
    assert_eq!(players[&1].daily_growth, 20);
    assert_eq!(players[&2].daily_growth, 0);
    assert_eq!(players[&3].daily_growth, 0);
}

#[tokio::test]
async fn opponents_defeated_are_attached_by_id() {
    let store = store_with_server();
    let od = OpponentsDefeated {
        rank_att: 1,
        score_att: 5000,
        ..Default::default()
    };
    let loader = MockLoader::new()
        .with_tribes(vec![tribe(4, 10, 0)])
        .with_players(vec![player(7, 4, 10, 0), player(8, 0, 10, 0)])
        .with_od(EntityKind::Player, 7, od)
        .with_od(EntityKind::Tribe, 4, od);

    sync_server_data(&store, &loader, &server(KEY, &warsaw()), now())
        .await
        .unwrap();

    let partition = store.partition(KEY).unwrap();
    assert_eq!(partition.players[&7].opponents_defeated, od);
    assert_eq!(partition.players[&8].opponents_defeated, OpponentsDefeated::default());
    assert_eq!(partition.tribes[&4].opponents_defeated, od);
    assert_eq!(partition.tribes[&4].dominance, 0.0);
}

// =========================================================================
// Failures
// =========================================================================

#[tokio::test]
async fn fetch_failure_writes_nothing() {
    let store = store_with_server();
    let loader = abc_snapshot().failing_on("get_unit_config");

    let result = sync_server_data(&store, &loader, &server(KEY, &warsaw()), now()).await;

    assert!(result.is_err());
    assert_eq!(store.commits(), 0);
    assert!(store.server(KEY).unwrap().data_updated_at.is_none());
}

#[tokio::test]
async fn write_failure_rolls_back_the_whole_pass() {
    let store = store_with_server();
    store.fail_on("upsert_villages");

    let result = sync_server_data(&store, &abc_snapshot(), &server(KEY, &warsaw()), now()).await;

    assert!(result.is_err());
    let partition = store.partition(KEY).unwrap();
    assert!(partition.players.is_empty());
    assert!(partition.tribes.is_empty());
    assert!(store.player_servers().is_empty());
    assert!(store.server(KEY).unwrap().data_updated_at.is_none());
}

#[tokio::test]
async fn successful_sync_updates_the_server_row() {
    let store = store_with_server();

    sync_server_data(&store, &abc_snapshot(), &server(KEY, &warsaw()), now())
        .await
        .unwrap();

    let row = store.server(KEY).unwrap();
    assert_eq!(row.data_updated_at, Some(now()));
    assert_eq!(row.number_of_players, 1);
    assert_eq!(row.number_of_tribes, 1);
    assert_eq!(row.number_of_villages, 101);
    assert_eq!(store.blobs(KEY).unwrap().config, "<config/>");
}
