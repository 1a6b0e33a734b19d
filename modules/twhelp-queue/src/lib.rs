//! Task queue for the world-data updater.
//!
//! Tasks are JSON payloads on one of two lanes: `main` for data, history,
//! stats and maintenance, and `ennoblements` for the minutely conquest feed.
//! Fan-out tasks return one follow-up task per server instead of doing the
//! work themselves.

pub mod error;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod task;
pub mod transport;

pub use error::RouterError;
pub use handlers::Jobs;
pub use registry::{handler_fn, no_follow_ups, FollowUps, TaskHandler, TaskRegistry};
pub use router::{LaneConfig, Router, RouterBuilder};
pub use task::{Lane, Task, TaskKind};
pub use transport::{Delivery, LocalQueue, QueueBackend};
