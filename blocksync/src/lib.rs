//! The block-sync executor: the orchestration core of riptide.
//!
//! [`run_block_sync`] wires a consensus engine to the bundle collector and
//! drives block application until the target height, coordinating three
//! side concerns along the way: waiting for application snapshots to land
//! on disk, staying within reach of the external snapshot pool, and
//! triggering periodic pruning and backups.

mod config;
mod executor;
mod pool_source;

pub use config::{BlockSyncConfig, SyncOptions};
pub use executor::{run_block_sync, sync_loop};
pub use pool_source::SnapshotPoolSource;

#[cfg(test)]
mod tests;
