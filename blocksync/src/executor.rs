//! The executor loop: single consumer of the bundle stream, sole driver of
//! the engine.

use crate::config::{BlockSyncConfig, SyncOptions};
use crate::pool_source::SnapshotPoolSource;
use anyhow::{bail, Context, Result};
use collector::{
    get_pool_info, http_client, start_block_collector, BlockSource, CollectorConfig,
    CollectorError, SnapshotPoolTracker,
};
use containers::{parse_height, DataItem, Height, Runtime};
use engine::Engine;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info};

/// Sync blocks into `engine` until the configured target height.
///
/// Resolves the runtime from pool metadata, spawns the block collector and
/// drives [`sync_loop`]. Returns once the target is reached, the source is
/// exhausted, or a fatal error occurs; the proxy app is stopped on every
/// exit path.
pub async fn run_block_sync<E>(
    engine: &mut E,
    config: &BlockSyncConfig,
    options: &SyncOptions,
) -> Result<()>
where
    E: Engine + ?Sized,
{
    let continuation_height = engine
        .get_continuation_height()
        .context("failed to get continuation height from engine")?;

    let app_height = engine
        .get_app_height()
        .await
        .context("failed to get app height from engine")?;

    engine
        .start_proxy_app()
        .await
        .context("failed to start proxy app")?;

    engine.do_handshake().await.context("failed to do handshake")?;

    let runtime = match config.block_pool_id {
        Some(pool_id) => {
            let client = http_client().context("failed to build http client")?;
            let pool = get_pool_info(&client, &config.chain_rest, pool_id)
                .await
                .context("failed to get pool info")?;
            let runtime: Runtime = pool
                .data
                .runtime
                .parse()
                .context("failed to resolve pool runtime")?;
            Some(runtime)
        }
        None => None,
    };

    let source = match (config.block_pool_id, &config.block_rpc) {
        (Some(pool_id), _) => BlockSource::Pool {
            chain_rest: config.chain_rest.clone(),
            storage_rest: config.storage_rest.clone(),
            pool_id,
        },
        (None, Some(endpoint)) => BlockSource::Rpc {
            endpoint: endpoint.clone(),
        },
        (None, None) => bail!("either a block pool id or a block rpc endpoint is required"),
    };

    info!(
        chain_id = %config.chain_id,
        continuation_height = continuation_height.0,
        target_height = config.target_height.0,
        "starting block sync"
    );

    let (items_tx, items_rx) = mpsc::channel(options.block_buffer);
    let (errors_tx, errors_rx) = mpsc::channel(1);
    let producer = tokio::spawn(start_block_collector(
        items_tx,
        errors_tx,
        CollectorConfig::new(source, continuation_height, config.target_height),
    ));

    let mut pool = SnapshotPoolTracker::new(config.chain_rest.as_str(), config.snapshot_pool_id)
        .context("failed to build snapshot pool client")?;

    let result = sync_loop(
        engine,
        config,
        options,
        app_height,
        continuation_height,
        items_rx,
        errors_rx,
        &mut pool,
        runtime,
    )
    .await;

    producer.abort();
    result
}

/// The main loop, separated from the wiring so tests can inject channels,
/// a mock engine and a stub snapshot-pool source.
#[allow(clippy::too_many_arguments)]
pub async fn sync_loop<E>(
    engine: &mut E,
    config: &BlockSyncConfig,
    options: &SyncOptions,
    initial_app_height: Height,
    continuation_height: Height,
    items: mpsc::Receiver<DataItem>,
    errors: mpsc::Receiver<CollectorError>,
    pool: &mut dyn SnapshotPoolSource,
    runtime: Option<Runtime>,
) -> Result<()>
where
    E: Engine + ?Sized,
{
    let result = drive(
        engine,
        config,
        options,
        initial_app_height,
        continuation_height,
        items,
        errors,
        pool,
        runtime,
    )
    .await;

    // the proxy app is released on every exit path
    match result {
        Ok(()) => engine
            .stop_proxy_app()
            .await
            .context("failed to stop proxy app"),
        Err(err) => {
            let _ = engine.stop_proxy_app().await;
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive<E>(
    engine: &mut E,
    config: &BlockSyncConfig,
    options: &SyncOptions,
    initial_app_height: Height,
    continuation_height: Height,
    mut items: mpsc::Receiver<DataItem>,
    mut errors: mpsc::Receiver<CollectorError>,
    pool: &mut dyn SnapshotPoolSource,
    runtime: Option<Runtime>,
) -> Result<()>
where
    E: Engine + ?Sized,
{
    let ahead_limit = options.snapshot_ahead_factor * config.snapshot_interval;
    let mut snapshot_pool_height = Height(0);

    // Do not start applying when the store is already too far ahead of the
    // snapshot pool: the pruning window would eat history the pool's
    // archivers have not sealed yet.
    if config.snapshot_interval > 0 && !config.skip_waiting {
        snapshot_pool_height = pool.refresh().await;
        if continuation_height.0 > snapshot_pool_height.0 + ahead_limit {
            info!("synced too far ahead of snapshot pool, waiting for snapshot pool to progress");
        }
        while continuation_height.0 > snapshot_pool_height.0 + ahead_limit {
            sleep(options.wait_interval).await;
            snapshot_pool_height = pool.refresh().await;
        }
    }

    loop {
        let item = tokio::select! {
            Some(err) = errors.recv() => {
                return Err(anyhow::Error::new(err).context("error in block collector"));
            }
            item = items.recv() => match item {
                Some(item) => item,
                // collector delivered through the target and closed the
                // stream; treat like target termination
                None => return Ok(()),
            },
        };

        let height = parse_height(&item.key)
            .with_context(|| format!("failed to parse block height from key \"{}\"", item.key))?;
        let applied = height.prev();

        engine
            .apply_block(runtime, &item.value)
            .await
            .context("failed to apply block in engine")?;

        // When the application is expected to emit a snapshot at the height
        // just applied, wait until it materializes; advancing the store past
        // an unwritten snapshot risks tearing it.
        if config.snapshot_interval > 0
            && applied >= continuation_height
            && applied.0 % config.snapshot_interval == 0
            && initial_app_height < applied
        {
            loop {
                info!(height = applied.0, "waiting until snapshot is created by app");
                match engine.is_snapshot_available(applied).await {
                    Ok(true) => {
                        info!(height = applied.0, "snapshot was created, continuing");
                        break;
                    }
                    Ok(false) => {
                        info!(height = applied.0, "snapshot was not created yet, waiting");
                    }
                    Err(err) => {
                        error!(height = applied.0, "check snapshot availability failed: {err}");
                    }
                }
                sleep(options.wait_interval).await;
            }

            // refresh here instead of on every block
            snapshot_pool_height = pool.refresh().await;
        }

        // the first iteration of a run only fills the engine's block
        // buffer; none of the per-block actions below apply yet
        if height == continuation_height {
            continue;
        }

        if config.pruning && applied.0 % options.pruning_interval == 0 {
            // syncing runs ahead_factor intervals ahead, so keep
            // window_factor intervals and prune everything below
            let window = options.snapshot_window_factor * config.snapshot_interval;
            let mut prune_target = Height(applied.0.saturating_sub(window));
            let base_height = engine.get_base_height();
            if prune_target < base_height {
                prune_target = base_height;
            }

            match engine.prune_blocks(prune_target) {
                Ok(()) => info!(height = prune_target.0, "pruned blocks"),
                Err(err) => error!("failed to prune blocks up to {}: {err}", prune_target.0),
            }
        }

        if let Some(backup_config) = &config.backup {
            if backup_config.interval > 0 && applied.0 % backup_config.interval == 0 {
                info!("reached backup interval height, starting to create backup");

                // let the engine flush before touching the data directory
                sleep(options.backup_grace).await;

                let chain_id = engine
                    .get_chain_id()
                    .context("failed to get chain id from genesis")?;

                match backup::create_backup(backup_config, &chain_id, applied.0, false).await {
                    Ok(()) => info!(height = applied.0, "finished backup"),
                    Err(err) => error!("failed to create backup: {err}"),
                }
            }
        }

        // Stay within reach of the snapshot pool. skip_waiting trades this
        // protection for raw speed.
        if config.snapshot_interval > 0 && !config.skip_waiting {
            if height.0 > snapshot_pool_height.0 + ahead_limit {
                info!(
                    "synced too far ahead of snapshot pool, waiting for snapshot pool to progress"
                );
            }
            while height.0 > snapshot_pool_height.0 + ahead_limit {
                sleep(options.wait_interval).await;
                snapshot_pool_height = pool.refresh().await;
            }
        }

        if config.target_height.0 > 0 && height >= config.target_height.next() {
            info!(height = config.target_height.0, "reached target height");
            return Ok(());
        }
    }
}
