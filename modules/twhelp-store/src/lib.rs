//! Persistence for world data.
//!
//! `Store` and `StoreTx` are the seam the sync jobs write through. `PgStore`
//! keeps every world in its own Postgres schema; `MemoryStore` backs tests.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::{MemoryStore, MemoryTx, PartitionData, ServerBlobs};
pub use postgres::{PgStore, PgTx};
pub use traits::{ServerFilter, ServerTimestamp, Store, StoreTx, VillageFilter};
