//! Reference engine implementation ("comet-v1").
//!
//! Replays comet-style JSON blocks: SQLite block/state stores, light commit
//! verification against the genesis validator set (plus application-issued
//! updates), and block finalization through the JSON proxy-app connection.

pub mod proxy;
pub mod store;

use crate::error::EngineError;
use crate::registry::ENGINE_COMET_V1;
use crate::Engine;
use async_trait::async_trait;
use containers::{decode_block, Block, GenesisDoc, Height, Runtime};
use proxy::{AppConn, FinalizeRequest, InitChainRequest, SocketApp};
use std::path::{Path, PathBuf};
use store::{BlockStore, ChainState, StateStore};
use tracing::{debug, info};

/// Default proxy-app listen address, matching the conventional ABCI port.
pub const DEFAULT_APP_ADDR: &str = "127.0.0.1:26658";

pub fn data_dir(home: &Path) -> PathBuf {
    home.join("data")
}

pub fn block_store_path(home: &Path) -> PathBuf {
    data_dir(home).join("blockstore.db")
}

pub fn state_store_path(home: &Path) -> PathBuf {
    data_dir(home).join("state.db")
}

pub fn genesis_path(home: &Path) -> PathBuf {
    home.join("config").join("genesis.json")
}

struct Stores {
    blocks: BlockStore,
    state: StateStore,
}

pub struct CometEngine {
    home: PathBuf,
    app_addr: String,
    stores: Option<Stores>,
    app: Option<SocketApp>,
    state: Option<ChainState>,
    prev_block: Option<Block>,
}

impl std::fmt::Debug for CometEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CometEngine")
            .field("home", &self.home)
            .field("app_addr", &self.app_addr)
            .finish()
    }
}

impl CometEngine {
    pub fn new(home: impl Into<PathBuf>, app_addr: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            app_addr: app_addr.into(),
            stores: None,
            app: None,
            state: None,
            prev_block: None,
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn load_genesis(&self) -> Result<GenesisDoc, EngineError> {
        Ok(GenesisDoc::load(&genesis_path(&self.home))?)
    }

    fn stores(&self) -> Result<&Stores, EngineError> {
        self.stores.as_ref().ok_or(EngineError::DbsNotOpen)
    }

    fn app_mut(&mut self) -> Result<&mut SocketApp, EngineError> {
        self.app
            .as_mut()
            .ok_or_else(|| EngineError::Handshake("proxy app not started".to_string()))
    }

    fn load_stored_block(&self, height: Height) -> Result<Block, EngineError> {
        let raw = self
            .stores()?
            .blocks
            .load_block(height)?
            .ok_or(EngineError::BlockNotFound(height))?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::Handshake(format!("corrupt stored block {height}: {e}")))
    }
}

fn finalize_request(block: &Block) -> FinalizeRequest {
    FinalizeRequest {
        height: block.height(),
        time: block.header.time.clone(),
        proposer_address: block.header.proposer_address.clone(),
        txs: block.data.clone(),
    }
}

fn validate_block(state: &ChainState, block: &Block) -> Result<(), EngineError> {
    let height = block.height();
    let fail = |reason: String| EngineError::Validation { height, reason };

    if block.chain_id() != state.chain_id {
        return Err(fail(format!(
            "chain id {} does not match {}",
            block.chain_id(),
            state.chain_id
        )));
    }
    if height != state.last_block_height.next() {
        return Err(fail(format!(
            "expected height {}, got {height}",
            state.last_block_height.next()
        )));
    }
    if block.header.last_block_id != state.last_block_id {
        return Err(fail("last block id does not link to stored tip".to_string()));
    }
    if !state.app_hash.is_zero() && block.header.app_hash != state.app_hash {
        return Err(fail(format!(
            "app hash {} does not match state app hash {}",
            block.header.app_hash, state.app_hash
        )));
    }
    if block.header.validators_hash != state.validators.hash() {
        return Err(fail("validators hash does not match active set".to_string()));
    }

    Ok(())
}

// Store handles are !Sync, so every store access below is scoped to a
// statement and never held across an await.
#[async_trait]
impl Engine for CometEngine {
    fn name(&self) -> &'static str {
        ENGINE_COMET_V1
    }

    fn open_dbs(&mut self) -> Result<(), EngineError> {
        if self.stores.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(data_dir(&self.home))?;
        let blocks = BlockStore::open(&block_store_path(&self.home))?;
        let state = StateStore::open(&state_store_path(&self.home))?;
        self.stores = Some(Stores { blocks, state });
        Ok(())
    }

    fn close_dbs(&mut self) -> Result<(), EngineError> {
        self.stores = None;
        Ok(())
    }

    async fn start_proxy_app(&mut self) -> Result<(), EngineError> {
        if self.app.is_some() {
            return Err(EngineError::ProxyAlreadyStarted);
        }
        self.app = Some(SocketApp::connect(&self.app_addr).await?);
        Ok(())
    }

    async fn stop_proxy_app(&mut self) -> Result<(), EngineError> {
        if self.app.take().is_none() {
            return Err(EngineError::ProxyAlreadyStopped);
        }
        Ok(())
    }

    async fn do_handshake(&mut self) -> Result<(), EngineError> {
        let genesis = self.load_genesis()?;

        let (mut state, store_height) = {
            let stores = self.stores()?;
            let state = match stores.state.load_state()? {
                Some(state) => state,
                None => ChainState::from_genesis(&genesis),
            };
            (state, stores.blocks.height()?)
        };

        let app_info = self.app_mut()?.info().await?;

        if app_info.last_block_height > store_height {
            return Err(EngineError::Handshake(format!(
                "state divergence: app height {} above store height {store_height}",
                app_info.last_block_height
            )));
        }

        if app_info.last_block_height.0 == 0 && state.is_fresh() {
            let response = self
                .app_mut()?
                .init_chain(InitChainRequest {
                    chain_id: genesis.chain_id.clone(),
                    initial_height: genesis.initial_height,
                    app_state: genesis.app_state.clone(),
                })
                .await?;
            state.app_hash = response.app_hash;
            debug!(chain_id = %genesis.chain_id, "initialized fresh application");
        }

        // Replay stored blocks the application has not executed yet.
        for h in (app_info.last_block_height.0 + 1)..=store_height.0 {
            let block = self.load_stored_block(Height(h))?;
            let response = self.app_mut()?.finalize_block(finalize_request(&block)).await?;

            state.last_block_height = block.height();
            state.last_block_id = block.hash();
            state.app_hash = response.app_hash;
            state.validators.apply_updates(response.validator_updates);

            let stores = self.stores()?;
            stores
                .state
                .save_block_results(block.height(), &response.tx_results)?;
            stores.state.save_state(&state)?;
            debug!(height = h, "replayed stored block into application");
        }

        if state.last_block_height < store_height {
            // The chain-state write was lost in a crash; rebuild the tip
            // from the store and the application.
            let block = self.load_stored_block(store_height)?;
            state.last_block_height = store_height;
            state.last_block_id = block.hash();
            state.app_hash = app_info.last_block_app_hash;
            self.stores()?.state.save_state(&state)?;
        }

        info!(
            height = state.last_block_height.0,
            chain_id = %state.chain_id,
            "handshake complete"
        );

        self.state = Some(state);
        self.prev_block = None;
        Ok(())
    }

    fn get_chain_id(&self) -> Result<String, EngineError> {
        Ok(self.load_genesis()?.chain_id)
    }

    fn get_continuation_height(&self) -> Result<Height, EngineError> {
        let store_height = self.stores()?.blocks.height()?;
        let initial_height = self.load_genesis()?.initial_height;
        Ok(store_height.next().max(initial_height))
    }

    async fn get_app_height(&mut self) -> Result<Height, EngineError> {
        let mut conn = SocketApp::connect(&self.app_addr).await?;
        Ok(conn.info().await?.last_block_height)
    }

    async fn apply_block(
        &mut self,
        runtime: Option<Runtime>,
        value: &[u8],
    ) -> Result<(), EngineError> {
        let block = decode_block(runtime, value)?;

        // First block of a run only fills the buffer: its predecessor's
        // commit has already been applied, its own commit is yet to come.
        let Some(prev) = self.prev_block.take() else {
            self.prev_block = Some(block);
            return Ok(());
        };

        let block_id = prev.hash();
        {
            let state = self
                .state
                .as_ref()
                .ok_or_else(|| EngineError::Handshake("apply_block before handshake".to_string()))?;

            validate_block(state, &prev)?;
            state
                .validators
                .verify_commit(&state.chain_id, block_id, prev.height(), &block.last_commit)
                .map_err(|source| EngineError::CommitVerification {
                    height: prev.height(),
                    source,
                })?;
        }

        self.stores()?.blocks.save_block(&prev, &block.last_commit)?;

        let request = finalize_request(&prev);
        let response = self.app_mut()?.finalize_block(request).await?;

        {
            let stores = self.stores.as_ref().ok_or(EngineError::DbsNotOpen)?;
            stores
                .state
                .save_block_results(prev.height(), &response.tx_results)?;

            let state = self
                .state
                .as_mut()
                .ok_or_else(|| EngineError::Handshake("apply_block before handshake".to_string()))?;
            state.last_block_height = prev.height();
            state.last_block_id = block_id;
            state.app_hash = response.app_hash;
            state.validators.apply_updates(response.validator_updates);
            stores.state.save_state(state)?;
        }

        self.prev_block = Some(block);
        Ok(())
    }

    async fn is_snapshot_available(&mut self, height: Height) -> Result<bool, EngineError> {
        let mut conn = SocketApp::connect(&self.app_addr).await?;
        let snapshots = conn.list_snapshots().await?;
        Ok(snapshots.iter().any(|s| s.height == height))
    }

    fn prune_blocks(&mut self, to_height: Height) -> Result<(), EngineError> {
        let stores = self.stores()?;
        let pruned = stores.blocks.prune(to_height)?;
        stores.state.prune_results(to_height)?;
        debug!(to_height = to_height.0, pruned, "pruned block store");
        Ok(())
    }

    fn get_height(&self) -> Height {
        self.stores
            .as_ref()
            .and_then(|s| s.blocks.height().ok())
            .unwrap_or_default()
    }

    fn get_base_height(&self) -> Height {
        self.stores
            .as_ref()
            .and_then(|s| s.blocks.base_height().ok())
            .unwrap_or_default()
    }

    fn get_block(&self, height: Height) -> Result<Vec<u8>, EngineError> {
        self.stores()?
            .blocks
            .load_block(height)?
            .map(String::into_bytes)
            .ok_or(EngineError::BlockNotFound(height))
    }
}
