//! Router behaviour over the in-process queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use tokio::sync::Notify;
use twhelp_common::Server;
use twhelp_queue::{
    handler_fn, no_follow_ups, FollowUps, Jobs, Lane, LaneConfig, LocalQueue, QueueBackend,
    Router, RouterError, Task, TaskKind, TaskRegistry,
};
use twhelp_store::MemoryStore;
use twhelp_sync::testing::{player, server, tribe, version, village, MockDirectory, MockLoader, MockLoaders};

fn en_server(key: &str) -> Server {
    server(key, &version("en", "Europe/London"))
}

fn router(registry: TaskRegistry, queue: &Arc<LocalQueue>, retry_limit: u32) -> Router {
    Router::builder(registry, queue.clone())
        .with_lane(Lane::Main, LaneConfig::new(2).with_retry_limit(retry_limit))
        .with_lane(
            Lane::Ennoblements,
            LaneConfig::new(1).with_retry_limit(retry_limit),
        )
        .build()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

// ---------------------------------------------------------------------------
// Dispatch and follow-ups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fan_out_follow_ups_reach_the_per_server_handler() {
    let seen = recorder();
    let mut registry = TaskRegistry::new();
    registry.register(
        TaskKind::UpdateEnnoblements,
        handler_fn(|_| async {
            let follow_ups: FollowUps = Box::new(["en1", "en2", "en3"].into_iter().map(|key| {
                let server = en_server(key);
                Task::UpdateServerEnnoblements {
                    url: server.url(),
                    server,
                }
            }));
            Ok(follow_ups)
        }),
    );
    let sink = seen.clone();
    registry.register(
        TaskKind::UpdateServerEnnoblements,
        handler_fn(move |task| {
            let sink = sink.clone();
            async move {
                if let Some(server) = task.server() {
                    sink.lock().unwrap().push(server.key.clone());
                }
                Ok(no_follow_ups())
            }
        }),
    );

    let queue = Arc::new(LocalQueue::new());
    let router = router(registry, &queue, 0);
    router.start().await;
    router.submit(Task::UpdateEnnoblements).await.unwrap();

    eventually("three per-server tasks", || seen.lock().unwrap().len() == 3).await;
    router.stop().await;

    let mut keys = seen.lock().unwrap().clone();
    keys.sort();
    assert_eq!(keys, vec!["en1", "en2", "en3"]);
    assert_eq!(queue.pending(Lane::Ennoblements), 0);
}

#[tokio::test]
async fn busy_main_lane_does_not_hold_up_ennoblements() {
    let release = Arc::new(Notify::new());
    let main_started = Arc::new(AtomicBool::new(false));
    let main_done = Arc::new(AtomicBool::new(false));
    let ennoblements_done = Arc::new(AtomicBool::new(false));

    let mut registry = TaskRegistry::new();
    {
        let (release, started, done) = (release.clone(), main_started.clone(), main_done.clone());
        registry.register(
            TaskKind::UpdateServerData,
            handler_fn(move |_| {
                let (release, started, done) = (release.clone(), started.clone(), done.clone());
                async move {
                    started.store(true, Ordering::SeqCst);
                    release.notified().await;
                    done.store(true, Ordering::SeqCst);
                    Ok(no_follow_ups())
                }
            }),
        );
    }
    {
        let done = ennoblements_done.clone();
        registry.register(
            TaskKind::UpdateServerEnnoblements,
            handler_fn(move |_| {
                let done = done.clone();
                async move {
                    done.store(true, Ordering::SeqCst);
                    Ok(no_follow_ups())
                }
            }),
        );
    }

    let queue = Arc::new(LocalQueue::new());
    let router = Router::builder(registry, queue.clone())
        .with_lane(Lane::Main, LaneConfig::new(1))
        .with_lane(Lane::Ennoblements, LaneConfig::new(1))
        .build();
    router.start().await;

    let server = en_server("en1");
    router
        .submit(Task::UpdateServerData {
            url: server.url(),
            server: server.clone(),
        })
        .await
        .unwrap();
    eventually("main task to start", || main_started.load(Ordering::SeqCst)).await;

    router
        .submit(Task::UpdateServerEnnoblements {
            url: server.url(),
            server,
        })
        .await
        .unwrap();
    eventually("ennoblement task", || ennoblements_done.load(Ordering::SeqCst)).await;
    assert!(!main_done.load(Ordering::SeqCst));

    release.notify_one();
    eventually("main task to finish", || main_done.load(Ordering::SeqCst)).await;
    router.stop().await;
}

// ---------------------------------------------------------------------------
// Failures and bad payloads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_task_is_retried_then_dropped() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = TaskRegistry::new();
    let counter = attempts.clone();
    registry.register(
        TaskKind::Vacuum,
        handler_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                bail!("database unavailable")
            }
        }),
    );

    let queue = Arc::new(LocalQueue::new());
    let router = router(registry, &queue, 2);
    router.start().await;
    router.submit(Task::Vacuum).await.unwrap();

    eventually("retries to run out", || {
        attempts.load(Ordering::SeqCst) == 3 && queue.pending(Lane::Main) == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    router.stop().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn invalid_payload_is_dropped_without_running_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = TaskRegistry::new();
    let counter = calls.clone();
    registry.register(
        TaskKind::VacuumServerData,
        handler_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(no_follow_ups())
            }
        }),
    );

    let queue = Arc::new(LocalQueue::new());
    let router = router(registry, &queue, 3);
    router.start().await;

    router
        .submit(Task::VacuumServerData {
            server: en_server(""),
        })
        .await
        .unwrap();
    queue.push(Lane::Main, "{not json".into()).await.unwrap();

    eventually("both messages to be settled", || {
        queue.pending(Lane::Main) == 0
    })
    .await;
    router.stop().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn submit_requires_a_lane_and_a_handler() {
    let mut registry = TaskRegistry::new();
    registry.register(TaskKind::UpdateEnnoblements, handler_fn(|_| async { Ok(no_follow_ups()) }));
    let queue = Arc::new(LocalQueue::new());

    let main_only = Router::builder(registry.clone(), queue.clone())
        .with_lane(Lane::Main, LaneConfig::new(1))
        .build();
    let err = main_only.submit(Task::UpdateEnnoblements).await.unwrap_err();
    assert!(matches!(err, RouterError::UnknownLane(ref lane) if lane == "ennoblements"));

    let both = router(registry, &queue, 0);
    let err = both.submit(Task::Vacuum).await.unwrap_err();
    assert!(matches!(err, RouterError::MissingHandler(TaskKind::Vacuum)));
    assert_eq!(queue.pending(Lane::Main), 0);
}

#[tokio::test]
async fn router_without_lanes_accepts_nothing() {
    let mut registry = TaskRegistry::new();
    registry.register(TaskKind::Vacuum, handler_fn(|_| async { Ok(no_follow_ups()) }));
    let queue = Arc::new(LocalQueue::new());

    let router = Router::builder(registry, queue.clone()).build();
    router.start().await;
    let err = router.submit(Task::Vacuum).await.unwrap_err();
    assert!(matches!(err, RouterError::UnknownLane(ref lane) if lane == "main"));
    router.stop().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_waits_for_in_flight_tasks() {
    let started = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let mut registry = TaskRegistry::new();
    {
        let (started, done) = (started.clone(), done.clone());
        registry.register(
            TaskKind::Vacuum,
            handler_fn(move |_| {
                let (started, done) = (started.clone(), done.clone());
                async move {
                    started.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    done.store(true, Ordering::SeqCst);
                    Ok(no_follow_ups())
                }
            }),
        );
    }

    let queue = Arc::new(LocalQueue::new());
    let router = router(registry, &queue, 0);
    router.start().await;
    router.submit(Task::Vacuum).await.unwrap();
    eventually("task to start", || started.load(Ordering::SeqCst)).await;

    router.stop().await;
    assert!(done.load(Ordering::SeqCst));

    let err = router.submit(Task::Vacuum).await.unwrap_err();
    assert!(matches!(err, RouterError::Transport(_)));
}

// ---------------------------------------------------------------------------
// Jobs end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn version_trigger_syncs_every_listed_world() {
    let en = version("en", "Europe/London");
    let store = Arc::new(MemoryStore::new());
    store.insert_version(en.clone());

    let world = MockLoader::new()
        .with_players(vec![player(1, 7, 300, 2)])
        .with_tribes(vec![tribe(7, 300, 2)])
        .with_villages(vec![village(10, 1), village(11, 1), village(12, 0)]);
    let loaders = MockLoaders::new()
        .with_directory(MockDirectory::new().on_host(&en.host, &["en1"]))
        .on_world(&format!("https://en1.{}", en.host), world);

    let jobs = Jobs::new(store.clone(), Arc::new(loaders), 180);
    let queue = Arc::new(LocalQueue::new());
    let router = router(jobs.into_registry(), &queue, 0);
    router.start().await;
    router
        .submit(Task::LoadVersionsAndUpdateServerData)
        .await
        .unwrap();

    eventually("world data to land", || {
        store
            .server("en1")
            .is_some_and(|s| s.data_updated_at.is_some())
    })
    .await;
    router.stop().await;

    let server = store.server("en1").unwrap();
    assert!(server.is_open());
    assert_eq!(server.number_of_players, 1);
    assert_eq!(server.number_of_villages, 3);

    let partition = store.partition("en1").unwrap();
    assert_eq!(partition.players.len(), 1);
    assert_eq!(partition.tribes.len(), 1);
    assert_eq!(store.player_servers(), vec![(1, "en1".to_string())]);
}
