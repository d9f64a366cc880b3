use crate::risk::{SafeSpenderRegistry, parse_safe_spender};
use crate::scanner::DEFAULT_STEP;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://cloudflare-eth.com";
pub const DEFAULT_TOP: usize = 50;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_CONCURRENCY: usize = 4;

fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_str(s).map_err(|_| format!("Invalid address format: {s}"))
}

#[derive(Parser, Debug)]
#[command(name = "spender-sentry")]
#[command(
    about = "Audit ERC-20 approvals: lists live (token, spender) allowances granted by an address",
    long_about = None
)]
pub struct Cli {
    /// Owner address whose approvals are audited
    #[arg(long, value_parser = parse_address)]
    pub address: Address,

    /// RPC URL; repeat to add fallback endpoints (default: $JSON_RPC_URL or Cloudflare)
    #[arg(long)]
    pub rpc: Vec<String>,

    /// First block to scan (default: 200k blocks before --to-block)
    #[arg(long)]
    pub from_block: Option<u64>,

    /// Last block to scan (default: latest)
    #[arg(long)]
    pub to_block: Option<u64>,

    /// Blocks per eth_getLogs request
    #[arg(long, default_value_t = DEFAULT_STEP, value_parser = clap::value_parser!(u64).range(1..))]
    pub step: u64,

    /// Write the full report as JSON to this path
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Write the full report as CSV to this path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Rows shown in the table
    #[arg(long, default_value_t = DEFAULT_TOP)]
    pub top: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Retries for transient RPC failures
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    pub retries: usize,

    /// Token and allowance lookups in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Extra known-safe spender as ADDRESS=LABEL (repeatable)
    #[arg(long = "safe-spender", value_name = "ADDRESS=LABEL")]
    pub safe_spenders: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_urls: Vec<String>,
    pub owner: Address,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub step: u64,
    pub json_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub top: usize,
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub concurrency: usize,
    pub safe_spenders: SafeSpenderRegistry,
}

impl Config {
    /// Defaults for everything except the owner.
    pub fn new(owner: Address) -> Self {
        Config {
            rpc_urls: vec![DEFAULT_RPC_URL.to_string()],
            owner,
            from_block: None,
            to_block: None,
            step: DEFAULT_STEP,
            json_path: None,
            csv_path: None,
            top: DEFAULT_TOP,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_RETRIES,
            concurrency: DEFAULT_CONCURRENCY,
            safe_spenders: SafeSpenderRegistry::mainnet(),
        }
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        dotenv::dotenv().ok();

        let rpc_urls = if cli.rpc.is_empty() {
            let url = std::env::var("JSON_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
            vec![url]
        } else {
            cli.rpc
        };

        let extra = cli
            .safe_spenders
            .iter()
            .map(String::as_str)
            .map(parse_safe_spender)
            .collect::<Result<Vec<_>>>()
            .context("Invalid --safe-spender entry")?;

        Ok(Config {
            rpc_urls,
            owner: cli.address,
            from_block: cli.from_block,
            to_block: cli.to_block,
            step: cli.step,
            json_path: cli.json,
            csv_path: cli.csv,
            top: cli.top,
            request_timeout: Duration::from_secs(cli.timeout),
            max_retries: cli.retries,
            concurrency: cli.concurrency.max(1),
            safe_spenders: SafeSpenderRegistry::with_extra(extra),
        })
    }
}
