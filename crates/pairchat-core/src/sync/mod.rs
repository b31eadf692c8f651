//! Log synchronization over multiplexed peer connections
//!
//! Each conversation has two logs, one per direction. The side that writes a
//! log is its origin; the other side holds a replica and may not know the
//! log's address until the origin's lighthouse tells it.

mod bootstrap;
mod engine;
mod status;

pub use bootstrap::{receive_address, run_lighthouse};
pub use engine::{LogRole, SyncEngine};
pub use status::SyncStatus;
