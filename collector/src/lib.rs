//! Bundle source: the producer side of the block-sync pipeline.
//!
//! [`blocks::start_block_collector`] runs as a concurrent task delivering a
//! strictly ascending, gap-free stream of [`containers::DataItem`]s on a
//! bounded channel, either from a data pool's archived bundles or from a
//! peer node's RPC. [`pool`] holds the pool-info client used both for
//! runtime resolution and for snapshot-pool backpressure.

pub mod blocks;
pub mod bundles;
pub mod pool;

mod error;

pub use blocks::{start_block_collector, BlockSource, CollectorConfig};
pub use error::CollectorError;
pub use pool::{get_pool_info, PoolInfo, SnapshotPoolTracker};

use reqwest::Client;
use std::time::Duration;

/// Shared HTTP client with a conservative request timeout.
pub fn http_client() -> Result<Client, CollectorError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|source| CollectorError::Client { source })
}
