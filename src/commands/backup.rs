use anyhow::{Context, Result};
use backup::BackupConfig;
use clap::Args;
use engine::comet::{data_dir, CometEngine, DEFAULT_APP_ADDR};
use engine::Engine;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Node home directory
    #[arg(long)]
    home: PathBuf,

    /// Backup destination (default: {home}/backups)
    #[arg(long)]
    backup_dest: Option<PathBuf>,

    /// Backup compression ("tar.gz", "zip" or empty for none)
    #[arg(long, default_value = "")]
    backup_compression: String,

    /// Number of newest backups to keep (0 keeps all)
    #[arg(long, default_value_t = 0)]
    backup_keep_recent: u64,
}

pub async fn run(args: BackupArgs) -> Result<()> {
    let mut engine = CometEngine::new(&args.home, DEFAULT_APP_ADDR);
    engine.open_dbs().context("failed to open dbs in engine")?;

    let height = engine.get_height();
    let chain_id = engine
        .get_chain_id()
        .context("failed to get chain id from genesis")?;

    let dest = args
        .backup_dest
        .clone()
        .unwrap_or_else(|| args.home.join("backups"));
    let config = BackupConfig::new(
        data_dir(&args.home),
        dest,
        0,
        args.backup_keep_recent,
        &args.backup_compression,
    )
    .context("could not build backup config")?;

    // close before archiving so the WAL is quiesced
    engine.close_dbs().context("failed to close dbs in engine")?;

    backup::create_backup(&config, &chain_id, height.0, false)
        .await
        .context("failed to create backup")?;

    info!(height = height.0, "finished backup at block height");
    Ok(())
}
