//! Sync jobs for world data.
//!
//! Each job works on one server: it reads upstream through a `SnapshotLoader`
//! and writes through one `StoreTx`. Fan-out selection lives in `fanout`.

pub mod ennoblements;
pub mod fanout;
pub mod history;
pub mod loader;
pub mod matcher;
pub mod metrics;
pub mod reconcile;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod vacuum;
pub mod villages;

pub use ennoblements::update_server_ennoblements;
pub use fanout::{sync_version_servers, targets, ServerTarget};
pub use history::{update_server_history, HistorySummary};
pub use loader::{DirectoryLoader, HttpLoaders, LoaderFactory, ServerListing, SnapshotLoader};
pub use matcher::{HasId, SortedById};
pub use reconcile::{sync_server_data, SyncSummary};
pub use stats::update_server_stats;
pub use vacuum::vacuum_server_data;
pub use villages::delete_non_existent_villages;
