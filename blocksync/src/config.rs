use backup::BackupConfig;
use containers::Height;
use std::time::Duration;

/// What to sync and from where. Built by the command layer.
#[derive(Debug, Clone)]
pub struct BlockSyncConfig {
    /// Chain id of the data-pool chain the bundles are fetched from.
    pub chain_id: String,
    pub chain_rest: String,
    pub storage_rest: String,
    /// Sync from this data pool. When absent, `block_rpc` must name a peer
    /// node instead.
    pub block_pool_id: Option<u64>,
    pub block_rpc: Option<String>,
    /// Inclusive terminal height. Zero syncs until cancelled.
    pub target_height: Height,
    /// Pool archiving application snapshots, used for backpressure.
    pub snapshot_pool_id: u64,
    /// Block period of application snapshots. Zero disables both the
    /// snapshot wait and snapshot-pool backpressure.
    pub snapshot_interval: u64,
    pub pruning: bool,
    /// Disable snapshot-pool backpressure and sync as fast as possible.
    pub skip_waiting: bool,
    pub backup: Option<BackupConfig>,
}

/// Tunables of the executor, injected rather than global so tests can run
/// the loop at millisecond cadence.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Capacity of the item channel between collector and executor.
    pub block_buffer: usize,
    /// Backpressure threshold in snapshot intervals.
    pub snapshot_ahead_factor: u64,
    /// Pruning retention window in snapshot intervals.
    pub snapshot_window_factor: u64,
    /// Pruning is evaluated every this many blocks.
    pub pruning_interval: u64,
    /// Pause between snapshot-wait and backpressure re-checks.
    pub wait_interval: Duration,
    /// Pause before a backup so the engine can flush.
    pub backup_grace: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            block_buffer: 300,
            snapshot_ahead_factor: 3,
            snapshot_window_factor: 6,
            pruning_interval: 100,
            wait_interval: Duration::from_secs(10),
            backup_grace: Duration::from_secs(15),
        }
    }
}
