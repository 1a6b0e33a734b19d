//! Lane-aware dispatcher.
//!
//! Each lane gets its own pool of workers. A worker reserves a message,
//! decodes and validates it, runs the registered handler, enqueues the
//! handler's follow-up tasks, and only then acks. Handler errors are retried
//! up to the lane's retry limit; undecodable or invalid payloads are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::RouterError;
use crate::registry::TaskRegistry;
use crate::task::{Lane, Task};
use crate::transport::{Delivery, QueueBackend};

/// How long an idle worker parks before polling again.
const IDLE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfig {
    pub workers: usize,
    pub reservation_timeout: Duration,
    /// Retries after the first attempt.
    pub retry_limit: u32,
}

impl LaneConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            reservation_timeout: Duration::from_secs(120),
            retry_limit: 3,
        }
    }

    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }
}

struct Shared {
    registry: TaskRegistry,
    backend: Arc<dyn QueueBackend>,
    lanes: HashMap<Lane, LaneConfig>,
}

impl Shared {
    async fn submit(&self, task: &Task) -> Result<(), RouterError> {
        let kind = task.kind();
        let lane = kind.lane();
        if !self.lanes.contains_key(&lane) {
            return Err(RouterError::UnknownLane(lane.to_string()));
        }
        if !self.registry.contains(kind) {
            return Err(RouterError::MissingHandler(kind));
        }
        let payload = serde_json::to_string(task)?;
        self.backend.push(lane, payload).await
    }

    async fn process(&self, config: &LaneConfig, delivery: Delivery) {
        let lane = delivery.lane;

        if delivery.attempt > config.retry_limit + 1 {
            error!(
                lane = %lane,
                message_id = delivery.id,
                attempt = delivery.attempt,
                "Dropping task after too many deliveries"
            );
            self.settle_ack(&delivery).await;
            return;
        }

        let task: Task = match serde_json::from_str(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                debug!(lane = %lane, message_id = delivery.id, error = %e, "Dropping undecodable task");
                self.settle_ack(&delivery).await;
                return;
            }
        };
        let kind = task.kind();

        if let Err(e) = task.validate() {
            debug!(task = %kind, message_id = delivery.id, error = %e, "Dropping invalid task payload");
            self.settle_ack(&delivery).await;
            return;
        }

        let Some(handler) = self.registry.get(kind) else {
            error!(task = %kind, "No handler registered, dropping task");
            self.settle_ack(&delivery).await;
            return;
        };

        let server = task.server().map(|s| s.key.clone()).unwrap_or_default();
        let started = Instant::now();
        match handler.handle(task).await {
            Ok(follow_ups) => {
                let mut enqueued = 0usize;
                for next in follow_ups {
                    match self.submit(&next).await {
                        Ok(()) => enqueued += 1,
                        Err(e) => warn!(
                            task = %kind,
                            follow_up = %next.kind(),
                            error = %e,
                            "Couldn't enqueue follow-up task"
                        ),
                    }
                }
                debug!(
                    task = %kind,
                    server = %server,
                    follow_ups = enqueued,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Task done"
                );
                self.settle_ack(&delivery).await;
            }
            Err(e) if delivery.attempt > config.retry_limit => {
                error!(
                    task = %kind,
                    server = %server,
                    attempt = delivery.attempt,
                    error = %e,
                    "Task failed, retries exhausted"
                );
                self.settle_ack(&delivery).await;
            }
            Err(e) => {
                warn!(
                    task = %kind,
                    server = %server,
                    attempt = delivery.attempt,
                    error = %e,
                    "Task failed, will retry"
                );
                if let Err(e) = self.backend.nack(&delivery).await {
                    error!(task = %kind, error = %e, "Couldn't release task for retry");
                }
            }
        }
    }

    async fn settle_ack(&self, delivery: &Delivery) {
        if let Err(e) = self.backend.ack(delivery).await {
            error!(lane = %delivery.lane, message_id = delivery.id, error = %e, "Couldn't ack task");
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    lane: Lane,
    config: LaneConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let idle = match shared.backend.reserve(lane, config.reservation_timeout).await {
            Ok(Some(delivery)) => {
                shared.process(&config, delivery).await;
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(lane = %lane, error = %e, "Couldn't reserve a task");
                true
            }
        };

        if idle {
            let stopped = tokio::select! {
                changed = shutdown.changed() => changed.is_err(),
                _ = shared.backend.wait(lane, IDLE_POLL) => false,
            };
            if stopped {
                break;
            }
        }
    }
}

pub struct Router {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Option<JoinSet<()>>>,
}

/// Lanes are fixed once the router is built.
pub struct RouterBuilder {
    registry: TaskRegistry,
    backend: Arc<dyn QueueBackend>,
    lanes: HashMap<Lane, LaneConfig>,
}

impl RouterBuilder {
    pub fn with_lane(mut self, lane: Lane, config: LaneConfig) -> Self {
        self.lanes.insert(lane, config);
        self
    }

    pub fn build(self) -> Router {
        let (shutdown, _) = watch::channel(false);
        Router {
            shared: Arc::new(Shared {
                registry: self.registry,
                backend: self.backend,
                lanes: self.lanes,
            }),
            shutdown,
            workers: Mutex::new(None),
        }
    }
}

impl Router {
    pub fn builder(registry: TaskRegistry, backend: Arc<dyn QueueBackend>) -> RouterBuilder {
        RouterBuilder {
            registry,
            backend,
            lanes: HashMap::new(),
        }
    }

    /// Enqueue a task on its lane.
    pub async fn submit(&self, task: Task) -> Result<(), RouterError> {
        self.shared.submit(&task).await
    }

    /// Spawn the worker pools. A second call is a no-op.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            warn!("Router already started");
            return;
        }

        let mut set = JoinSet::new();
        let mut lanes: Vec<_> = self.shared.lanes.iter().map(|(l, c)| (*l, *c)).collect();
        lanes.sort_by_key(|(lane, _)| *lane);
        for (lane, config) in lanes {
            for _ in 0..config.workers {
                set.spawn(run_worker(
                    self.shared.clone(),
                    lane,
                    config,
                    self.shutdown.subscribe(),
                ));
            }
            info!(lane = %lane, workers = config.workers, "Lane started");
        }
        *workers = Some(set);
    }

    /// Stop reserving new work, wait for in-flight tasks, then close the transport.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let set = self.workers.lock().await.take();
        if let Some(mut set) = set {
            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker panicked");
                }
            }
        }

        self.shared.backend.close().await;
        info!("Router stopped");
    }
}
