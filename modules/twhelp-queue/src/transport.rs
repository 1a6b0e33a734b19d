//! Message transport under the router.
//!
//! A reserved message stays invisible to other workers until it is acked,
//! nacked, or its reservation expires. Expired reservations go back to the
//! front of the lane with the attempt counter bumped, so a worker that dies
//! mid-task leads to redelivery rather than loss.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::RouterError;
use crate::task::Lane;

/// One reserved message. `attempt` starts at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    pub lane: Lane,
    pub payload: String,
    pub attempt: u32,
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn push(&self, lane: Lane, payload: String) -> Result<(), RouterError>;

    /// Take the next visible message without waiting.
    async fn reserve(
        &self,
        lane: Lane,
        reservation_timeout: Duration,
    ) -> Result<Option<Delivery>, RouterError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), RouterError>;

    /// Make the message visible again for another attempt.
    async fn nack(&self, delivery: &Delivery) -> Result<(), RouterError>;

    /// Park until something may be ready on `lane`, at most `max_wait`.
    async fn wait(&self, _lane: Lane, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }

    /// Refuse further pushes.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// LocalQueue: in-process transport
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Message {
    id: u64,
    payload: String,
    deliveries: u32,
}

#[derive(Debug)]
struct Reservation {
    message: Message,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct LaneQueue {
    ready: VecDeque<Message>,
    reserved: HashMap<u64, Reservation>,
}

impl LaneQueue {
    /// Release the reservation only if `delivery` still holds it.
    fn release(&mut self, delivery: &Delivery) -> Option<Message> {
        let current = self.reserved.get(&delivery.id)?;
        if current.message.deliveries != delivery.attempt {
            return None;
        }
        self.reserved.remove(&delivery.id).map(|r| r.message)
    }

    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .reserved
            .iter()
            .filter(|(_, r)| r.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(r) = self.reserved.remove(&id) {
                tracing::warn!(message_id = id, "Reservation expired, redelivering");
                self.ready.push_front(r.message);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    lanes: HashMap<Lane, LaneQueue>,
    next_id: u64,
    closed: bool,
}

/// Single-process queue used by the server binary and the tests.
#[derive(Debug, Default)]
pub struct LocalQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages waiting or in flight on `lane`.
    pub fn pending(&self, lane: Lane) -> usize {
        let inner = self.lock();
        inner
            .lanes
            .get(&lane)
            .map_or(0, |q| q.ready.len() + q.reserved.len())
    }
}

#[async_trait]
impl QueueBackend for LocalQueue {
    async fn push(&self, lane: Lane, payload: String) -> Result<(), RouterError> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(RouterError::Transport("queue is closed".into()));
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner.lanes.entry(lane).or_default().ready.push_back(Message {
                id,
                payload,
                deliveries: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reserve(
        &self,
        lane: Lane,
        reservation_timeout: Duration,
    ) -> Result<Option<Delivery>, RouterError> {
        let mut inner = self.lock();
        let queue = inner.lanes.entry(lane).or_default();
        let now = Instant::now();
        queue.requeue_expired(now);

        let Some(mut message) = queue.ready.pop_front() else {
            return Ok(None);
        };
        message.deliveries += 1;
        let delivery = Delivery {
            id: message.id,
            lane,
            payload: message.payload.clone(),
            attempt: message.deliveries,
        };
        queue.reserved.insert(
            message.id,
            Reservation {
                message,
                deadline: now + reservation_timeout,
            },
        );
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), RouterError> {
        let mut inner = self.lock();
        if let Some(queue) = inner.lanes.get_mut(&delivery.lane) {
            queue.release(delivery);
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), RouterError> {
        {
            let mut inner = self.lock();
            let Some(queue) = inner.lanes.get_mut(&delivery.lane) else {
                return Ok(());
            };
            // Already redelivered after expiry; nothing to hand back.
            let Some(message) = queue.release(delivery) else {
                return Ok(());
            };
            queue.ready.push_back(message);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn wait(&self, _lane: Lane, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }

    async fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(120);

    #[tokio::test]
    async fn lanes_are_independent_fifos() {
        let queue = LocalQueue::new();
        queue.push(Lane::Main, "a".into()).await.unwrap();
        queue.push(Lane::Ennoblements, "e".into()).await.unwrap();
        queue.push(Lane::Main, "b".into()).await.unwrap();

        let first = queue.reserve(Lane::Main, LONG).await.unwrap().unwrap();
        let second = queue.reserve(Lane::Main, LONG).await.unwrap().unwrap();
        assert_eq!(first.payload, "a");
        assert_eq!(second.payload, "b");
        assert!(queue.reserve(Lane::Main, LONG).await.unwrap().is_none());

        let other = queue.reserve(Lane::Ennoblements, LONG).await.unwrap().unwrap();
        assert_eq!(other.payload, "e");
    }

    #[tokio::test]
    async fn ack_removes_the_message() {
        let queue = LocalQueue::new();
        queue.push(Lane::Main, "a".into()).await.unwrap();
        let delivery = queue.reserve(Lane::Main, LONG).await.unwrap().unwrap();
        assert_eq!(queue.pending(Lane::Main), 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.pending(Lane::Main), 0);
    }

    #[tokio::test]
    async fn nack_redelivers_with_next_attempt() {
        let queue = LocalQueue::new();
        queue.push(Lane::Main, "a".into()).await.unwrap();
        let first = queue.reserve(Lane::Main, LONG).await.unwrap().unwrap();
        queue.nack(&first).await.unwrap();

        let second = queue.reserve(Lane::Main, LONG).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn expired_reservation_is_redelivered() {
        let queue = LocalQueue::new();
        queue.push(Lane::Main, "a".into()).await.unwrap();
        let first = queue.reserve(Lane::Main, Duration::ZERO).await.unwrap().unwrap();

        let again = queue.reserve(Lane::Main, LONG).await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempt, 2);

        // The stale holder's nack must not release the live reservation.
        queue.nack(&first).await.unwrap();
        queue.ack(&again).await.unwrap();
        assert_eq!(queue.pending(Lane::Main), 0);
    }

    #[tokio::test]
    async fn closed_queue_refuses_pushes() {
        let queue = LocalQueue::new();
        queue.close().await;
        let err = queue.push(Lane::Main, "a".into()).await.unwrap_err();
        assert!(matches!(err, RouterError::Transport(_)));
    }
}
