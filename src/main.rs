use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docsync::bridge::SyncBridge;
use docsync::client::RemoteClient;
use docsync::load_config::load_config;
use docsync::monitor::{run_consumer, FileMonitor, MonitorConfig};

/// CLI for docsync: keep local documentation and a remote workspace in sync.
#[derive(Parser)]
#[clap(
    name = "docsync",
    version,
    about = "Synchronise Markdown documentation trees with a remote workspace"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronisation pass over all configured mappings
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Sync once, then watch the mapped directories for changes
    Watch {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config)?;
            let client = RemoteClient::new(&config)?;
            let bridge = SyncBridge::new(config, client)?;
            bridge.initialize().await?;
            let report = bridge.sync_all().await;
            println!("{report:#?}");
        }
        Commands::Watch { config } => {
            let config = load_config(config)?;
            let monitor_config = MonitorConfig::for_mappings(&config.mappings);
            let client = RemoteClient::new(&config)?;
            let bridge = SyncBridge::new(config, client)?;
            bridge.initialize().await?;
            let report = bridge.sync_all().await;
            println!("{report:#?}");

            let (mut monitor, rx) = FileMonitor::new(monitor_config);
            monitor.start()?;
            run_consumer(rx, &bridge).await;
        }
    }
    Ok(())
}
