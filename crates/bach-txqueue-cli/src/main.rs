//! # bach-txq
//!
//! Runs a file of transaction intents through the queue against a JSON-RPC node.
//!
//! ## Usage
//!
//! ```bash
//! # Submit a batch, highest priority first
//! bach-txq run --intents batch.json --sender 0x...
//!
//! # Chain the intents in file order, give up after a minute
//! bach-txq run --intents batch.json --sequence --timeout 60 --json
//!
//! # Show the effective configuration
//! bach-txq --config txq.toml config
//! ```

use anyhow::Result;
use bach_txqueue::TxQueueManager;
use bach_txqueue_rpc::RpcProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod config;
mod intents;
mod output;

use cli::{Cli, Command, RunArgs};
use config::FileConfig;
use output::Report;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse_args();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = FileConfig::load_or_default(cli.config.as_deref())?.with_overrides(cli.rpc_url, cli.sender);

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Run(args) => run(config, args).await,
    }
}

async fn run(config: FileConfig, args: RunArgs) -> Result<()> {
    let sender = config
        .sender
        .ok_or_else(|| anyhow::anyhow!("no sender: pass --sender or set `sender` in the config file"))?;
    let items = intents::load(&args.intents)?;
    tracing::info!("Loaded {} intents from {}", items.len(), args.intents.display());

    let provider = RpcProvider::connect(&config.rpc_url, sender);
    let manager = TxQueueManager::builder()
        .provider(Arc::new(provider))
        .config(config.queue.clone())
        .build()?;

    let ids = if args.sequence {
        manager.submit_sequence(items)?
    } else {
        manager.submit_batch(items)?
    };
    tracing::info!("Submitted {} transactions to {} as {:?}", ids.len(), config.rpc_url, sender);

    if !manager.is_running() {
        manager.start();
    }

    let timeout = args.timeout.map(Duration::from_secs);
    tokio::select! {
        result = manager.wait_for_drain(timeout) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping the queue");
            manager.stop();
        }
    }

    let report = Report::new(args.json, manager.all(), manager.stats());
    report.print();

    if !report.all_confirmed() {
        let stats = manager.stats();
        anyhow::bail!("{} of {} transactions did not confirm", stats.total - stats.confirmed, stats.total);
    }
    Ok(())
}
