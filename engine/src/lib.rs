//! Consensus engine adapters.
//!
//! The block-sync executor is polymorphic over the [`Engine`] capability
//! trait defined here; everything an engine does internally (stores, proxy
//! app connection, prev-block buffering) stays behind it. One reference
//! implementation ships in [`comet`]; the [`registry`] maps engine tags and
//! upgrade heights to implementations.

pub mod comet;
pub mod registry;

mod error;

pub use comet::CometEngine;
pub use error::EngineError;
pub use registry::{
    engine_factory, engine_for_height, parse_upgrades, AVAILABLE_ENGINES, ENGINE_COMET_V1,
};

use async_trait::async_trait;
use containers::{Height, Runtime};

/// Capability contract between the block-sync executor and a consensus
/// engine version.
///
/// Lifecycle: `open_dbs → start_proxy_app → do_handshake → apply_block* →
/// stop_proxy_app → close_dbs`. `apply_block` is legal only after a
/// successful handshake. `open_dbs` and `close_dbs` are idempotent.
#[async_trait]
pub trait Engine: Send + std::fmt::Debug {
    /// Engine tag as registered in the registry.
    fn name(&self) -> &'static str;

    /// Acquire the block and state stores. Idempotent.
    fn open_dbs(&mut self) -> Result<(), EngineError>;

    /// Release the stores. Idempotent.
    fn close_dbs(&mut self) -> Result<(), EngineError>;

    /// Establish the persistent connection to the application. Errors if
    /// already started.
    async fn start_proxy_app(&mut self) -> Result<(), EngineError>;

    /// Drop the application connection. Errors if already stopped.
    async fn stop_proxy_app(&mut self) -> Result<(), EngineError>;

    /// Synchronize state store and application, loading the validator set
    /// and replaying stored blocks the application has not executed yet.
    async fn do_handshake(&mut self) -> Result<(), EngineError>;

    /// Chain id from the genesis file.
    fn get_chain_id(&self) -> Result<String, EngineError>;

    /// First height to apply: `max(store_height + 1, initial_height)`.
    fn get_continuation_height(&self) -> Result<Height, EngineError>;

    /// Last height the application acknowledges via its info call. Uses a
    /// short-lived connection, so it works before `start_proxy_app`.
    async fn get_app_height(&mut self) -> Result<Height, EngineError>;

    /// Feed the next block. Decodes `value` per the runtime tag, then
    /// applies the prev-block buffer discipline: the *previous* block is
    /// validated, commit-verified against the current validator set, saved
    /// and finalized, and the new block takes its place in the buffer. The
    /// first call of a run only buffers.
    async fn apply_block(
        &mut self,
        runtime: Option<Runtime>,
        value: &[u8],
    ) -> Result<(), EngineError>;

    /// Whether the application lists a snapshot at exactly `height`.
    async fn is_snapshot_available(&mut self, height: Height) -> Result<bool, EngineError>;

    /// Prune block store and block results strictly below `to_height`.
    fn prune_blocks(&mut self, to_height: Height) -> Result<(), EngineError>;

    /// Latest stored height. Zero before any block is stored.
    fn get_height(&self) -> Height;

    /// Earliest stored height. Zero on an empty store.
    fn get_base_height(&self) -> Height;

    /// Stored block at `height` as JSON bytes, for the read-only RPC
    /// collaborator.
    fn get_block(&self, height: Height) -> Result<Vec<u8>, EngineError>;
}
