use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "riptide",
    version,
    about = "Fast block syncing for ABCI chains from archived data pools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync blocks from a data pool or peer node into the local engine
    BlockSync(commands::block_sync::BlockSyncArgs),
    /// Back up the data directory
    Backup(commands::backup::BackupArgs),
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::BlockSync(args) => commands::block_sync::run(args).await,
        Commands::Backup(args) => commands::backup::run(args).await,
        Commands::Version => {
            println!("riptide {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}
