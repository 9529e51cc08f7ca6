use anyhow::{bail, Context, Result};
use backup::BackupConfig;
use blocksync::{run_block_sync, BlockSyncConfig, SyncOptions};
use clap::Args;
use containers::Height;
use engine::comet::{data_dir, DEFAULT_APP_ADDR};
use engine::Engine;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Args, Debug)]
pub struct BlockSyncArgs {
    /// Consensus engine of the chain; see `engine::AVAILABLE_ENGINES`.
    /// Overrides --upgrades when set
    #[arg(short, long, default_value = "")]
    engine: String,

    /// Engine upgrade pairs "height:tag,..."; the engine for the run is
    /// the highest entry at or below the continuation height
    #[arg(long, default_value = "")]
    upgrades: String,

    /// Node home directory
    #[arg(long)]
    home: PathBuf,

    /// Chain id of the data-pool chain
    #[arg(short, long, default_value = "kyve-1")]
    chain_id: String,

    /// Rest endpoint of the data-pool chain (default derived from
    /// --chain-id)
    #[arg(long)]
    chain_rest: Option<String>,

    /// Storage endpoint for requesting bundle data
    #[arg(long, default_value = "https://storage.kyve.network")]
    storage_rest: String,

    /// Pool id of the block pool; omit to sync from a peer node instead
    #[arg(long)]
    block_pool_id: Option<u64>,

    /// RPC endpoint of a peer node, used when no block pool id is given
    #[arg(long)]
    block_rpc: Option<String>,

    /// Target height (inclusive); 0 syncs until cancelled
    #[arg(short, long, default_value_t = 0)]
    target_height: u64,

    /// Pool id of the snapshot pool, for backpressure
    #[arg(long, default_value_t = 0)]
    snapshot_pool_id: u64,

    /// Block interval of application snapshots; 0 disables snapshot
    /// coordination
    #[arg(long, default_value_t = 0)]
    snapshot_interval: u64,

    /// Prune blocks outside the snapshot retention window
    #[arg(long)]
    pruning: bool,

    /// Ignore the snapshot pool and sync as fast as possible
    #[arg(long)]
    skip_waiting: bool,

    /// Address of the application's proxy-app socket
    #[arg(long, default_value = DEFAULT_APP_ADDR)]
    app_addr: String,

    /// Serve the read-only /status, /block and /block_results endpoint
    #[arg(long)]
    rpc_server: bool,

    #[arg(long, default_value_t = 7070)]
    rpc_server_port: u16,

    /// Block interval for data-directory backups; 0 disables them
    #[arg(long, default_value_t = 0)]
    backup_interval: u64,

    /// Number of newest backups to keep (0 keeps all)
    #[arg(long, default_value_t = 3)]
    backup_keep_recent: u64,

    /// Backup compression ("tar.gz", "zip" or empty for none)
    #[arg(long, default_value = "")]
    backup_compression: String,

    /// Backup destination (default: {home}/backups)
    #[arg(long)]
    backup_dest: Option<PathBuf>,
}

pub async fn run(args: BlockSyncArgs) -> Result<()> {
    let chain_rest = resolve_chain_rest(&args.chain_id, args.chain_rest.as_deref())?;

    // An explicit --engine wins; otherwise the registry picks the engine
    // for the continuation height from the upgrade pairs.
    let engine_tag = if args.engine.is_empty() && !args.upgrades.is_empty() {
        let upgrades =
            engine::parse_upgrades(&args.upgrades).context("failed to parse upgrades")?;

        let mut probe = engine::engine_factory("", &args.home, &args.app_addr)
            .context("failed to create consensus engine")?;
        probe.open_dbs().context("failed to open dbs in engine")?;
        let continuation_height = probe
            .get_continuation_height()
            .context("failed to get continuation height")?;
        probe.close_dbs().context("failed to close dbs in engine")?;

        let tag = engine::engine_for_height(&upgrades, continuation_height).to_string();
        info!(
            engine = %tag,
            continuation_height = continuation_height.0,
            "using consensus engine from upgrade registry"
        );
        tag
    } else {
        args.engine.clone()
    };

    let mut engine = engine::engine_factory(&engine_tag, &args.home, &args.app_addr)
        .context("failed to create consensus engine")?;

    engine.open_dbs().context("failed to open dbs in engine")?;

    let backup = if args.backup_interval > 0 {
        let dest = args
            .backup_dest
            .clone()
            .unwrap_or_else(|| args.home.join("backups"));
        Some(
            BackupConfig::new(
                data_dir(&args.home),
                dest,
                args.backup_interval,
                args.backup_keep_recent,
                &args.backup_compression,
            )
            .context("could not build backup config")?,
        )
    } else {
        None
    };

    let config = BlockSyncConfig {
        chain_id: args.chain_id.clone(),
        chain_rest,
        storage_rest: args.storage_rest.trim_end_matches('/').to_string(),
        block_pool_id: args.block_pool_id,
        block_rpc: args.block_rpc.clone(),
        target_height: Height(args.target_height),
        snapshot_pool_id: args.snapshot_pool_id,
        snapshot_interval: args.snapshot_interval,
        pruning: args.pruning,
        skip_waiting: args.skip_waiting,
        backup,
    };

    if args.rpc_server {
        let home = args.home.clone();
        let port = args.rpc_server_port;
        tokio::spawn(async move {
            if let Err(err) = rpc::serve(home, port).await {
                error!("rpc server exited: {err:#}");
            }
        });
    }

    let result = run_block_sync(&mut *engine, &config, &SyncOptions::default()).await;

    if let Err(err) = engine.close_dbs() {
        error!("failed to close dbs in engine: {err}");
    }

    if result.is_ok() {
        info!("block sync finished");
    }
    result
}

/// Default rest endpoint per known data-pool chain; an explicit
/// `--chain-rest` always wins.
fn resolve_chain_rest(chain_id: &str, chain_rest: Option<&str>) -> Result<String> {
    if let Some(rest) = chain_rest {
        return Ok(rest.trim_end_matches('/').to_string());
    }
    let rest = match chain_id {
        "kyve-1" => "https://api.kyve.network",
        "kaon-1" => "https://api.kaon.kyve.network",
        "korellia-2" => "https://api.korellia.kyve.network",
        other => bail!("unknown chain id \"{other}\", pass --chain-rest explicitly"),
    };
    Ok(rest.to_string())
}
