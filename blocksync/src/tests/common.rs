//! Mock engine and stub snapshot pool driving the executor loop in tests.

use crate::{BlockSyncConfig, SnapshotPoolSource, SyncOptions};
use async_trait::async_trait;
use containers::{DataItem, Height, Runtime};
use engine::{Engine, EngineError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Engine double that records every interaction. Mirrors the prev-block
/// buffer: feeding height `h` commits `h - 1`.
#[derive(Default, Debug)]
pub struct MockEngine {
    pub fed: Vec<u64>,
    pub prev: Option<u64>,
    pub height: u64,
    pub base: u64,
    pub proxy_running: bool,
    pub proxy_stops: u32,
    pub pruned_to: Vec<u64>,
    /// Feeding this height fails commit verification for its predecessor.
    pub fail_commit_at: Option<u64>,
    /// How many availability checks return false before turning true.
    pub snapshot_denials: u32,
    pub snapshot_checks: u32,
}

impl MockEngine {
    pub fn at_height(height: u64) -> Self {
        Self {
            height,
            base: if height > 0 { 1 } else { 0 },
            ..Default::default()
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open_dbs(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn close_dbs(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn start_proxy_app(&mut self) -> Result<(), EngineError> {
        if self.proxy_running {
            return Err(EngineError::ProxyAlreadyStarted);
        }
        self.proxy_running = true;
        Ok(())
    }

    async fn stop_proxy_app(&mut self) -> Result<(), EngineError> {
        if !self.proxy_running {
            return Err(EngineError::ProxyAlreadyStopped);
        }
        self.proxy_running = false;
        self.proxy_stops += 1;
        Ok(())
    }

    async fn do_handshake(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn get_chain_id(&self) -> Result<String, EngineError> {
        Ok("riptide-test-1".to_string())
    }

    fn get_continuation_height(&self) -> Result<Height, EngineError> {
        Ok(Height(self.height + 1).max(Height(1)))
    }

    async fn get_app_height(&mut self) -> Result<Height, EngineError> {
        Ok(Height(self.height))
    }

    async fn apply_block(
        &mut self,
        _runtime: Option<Runtime>,
        value: &[u8],
    ) -> Result<(), EngineError> {
        let height: u64 = std::str::from_utf8(value)
            .expect("mock item values are utf8 heights")
            .parse()
            .expect("mock item values are decimal heights");
        self.fed.push(height);

        if self.fail_commit_at == Some(height) {
            return Err(EngineError::CommitVerification {
                height: Height(height - 1),
                source: containers::Error::CommitBlockIdMismatch {
                    height: Height(height - 1),
                },
            });
        }

        if let Some(prev) = self.prev.take() {
            self.height = prev;
            if self.base == 0 {
                self.base = prev;
            }
        }
        self.prev = Some(height);
        Ok(())
    }

    async fn is_snapshot_available(&mut self, _height: Height) -> Result<bool, EngineError> {
        self.snapshot_checks += 1;
        if self.snapshot_denials > 0 {
            self.snapshot_denials -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn prune_blocks(&mut self, to_height: Height) -> Result<(), EngineError> {
        self.pruned_to.push(to_height.0);
        if to_height.0 > self.base {
            self.base = to_height.0.min(self.height);
        }
        Ok(())
    }

    fn get_height(&self) -> Height {
        Height(self.height)
    }

    fn get_base_height(&self) -> Height {
        Height(self.base)
    }

    fn get_block(&self, height: Height) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::BlockNotFound(height))
    }
}

/// Snapshot-pool stub advancing by a fixed step per refresh.
pub struct StubPool {
    pub height: u64,
    pub step: u64,
    pub refreshes: u32,
}

impl StubPool {
    pub fn fixed(height: u64) -> Self {
        Self {
            height,
            step: 0,
            refreshes: 0,
        }
    }

    pub fn advancing(height: u64, step: u64) -> Self {
        Self {
            height,
            step,
            refreshes: 0,
        }
    }
}

#[async_trait]
impl SnapshotPoolSource for StubPool {
    async fn refresh(&mut self) -> Height {
        self.refreshes += 1;
        let current = self.height;
        self.height += self.step;
        Height(current)
    }
}

pub fn test_config() -> BlockSyncConfig {
    BlockSyncConfig {
        chain_id: "kyve-1".to_string(),
        chain_rest: String::new(),
        storage_rest: String::new(),
        block_pool_id: None,
        block_rpc: None,
        target_height: Height(0),
        snapshot_pool_id: 0,
        snapshot_interval: 0,
        pruning: false,
        skip_waiting: false,
        backup: None,
    }
}

pub fn test_options() -> SyncOptions {
    SyncOptions {
        block_buffer: 64,
        snapshot_ahead_factor: 3,
        snapshot_window_factor: 6,
        pruning_interval: 5,
        wait_interval: Duration::from_millis(5),
        backup_grace: Duration::from_millis(1),
    }
}

pub fn item(height: u64) -> DataItem {
    DataItem {
        key: height.to_string(),
        value: height.to_string().into_bytes(),
    }
}

pub async fn feed(tx: &mpsc::Sender<DataItem>, heights: impl IntoIterator<Item = u64>) {
    for height in heights {
        tx.send(item(height)).await.unwrap();
    }
}
