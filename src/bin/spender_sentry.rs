use anyhow::Result;
use clap::Parser;
use spender_sentry::audit::{print_report, run_audit};
use spender_sentry::config::{Cli, Config};
use spender_sentry::rpc::RpcClient;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    info!("Auditing approvals by {}", config.owner);
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.rpc_urls.len()
    );

    let client = RpcClient::new(&config.rpc_urls, config.request_timeout, config.max_retries)?;

    let outcome = match run_audit(&client, &config).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Audit failed: {:#}", e);
            return Err(e);
        }
    };

    print_report(&outcome, &config)
}
