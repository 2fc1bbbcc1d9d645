//! Command line arguments

use bach_txqueue::Address;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Transaction queue runner
#[derive(Parser, Debug)]
#[command(name = "bach-txq")]
#[command(author = "BachLedger Team")]
#[command(version)]
#[command(about = "Queue, order and execute transactions against a JSON-RPC node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// RPC endpoint URL (overrides the config file)
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    /// Sending account (overrides the config file)
    #[arg(long, global = true, value_parser = parse_address)]
    pub sender: Option<Address>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a file of intents and wait until the queue drains
    Run(RunArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Arguments of `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON file holding an array of intents
    #[arg(long)]
    pub intents: PathBuf,

    /// Chain the intents in file order
    #[arg(long)]
    pub sequence: bool,

    /// Give up waiting for the queue after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse a 20-byte hex address, `0x` prefix optional
pub fn parse_address(s: &str) -> Result<Address, String> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| format!("invalid address {}: {}", s, e))?;
    if bytes.len() != 20 {
        return Err(format!("invalid address {}: expected 20 bytes, got {}", s, bytes.len()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}
