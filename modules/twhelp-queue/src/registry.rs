//! Task handlers and the kind-to-handler table the router dispatches through.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::task::{Task, TaskKind};

/// Tasks a handler asks the router to enqueue after it succeeds.
pub type FollowUps = Box<dyn Iterator<Item = Task> + Send>;

pub fn no_follow_ups() -> FollowUps {
    Box::new(std::iter::empty())
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> Result<FollowUps>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FollowUps>> + Send + 'static,
{
    async fn handle(&self, task: Task) -> Result<FollowUps> {
        (self.0)(task).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FollowUps>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations for the same kind replace earlier ones.
    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
