use crate::config::Config;
use crate::report::{AllowanceRow, build_report, render_summary, render_table, write_csv, write_json};
use crate::rpc::ChainReader;
use crate::scanner::{Scanner, resolve_range};
use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub chain_id: u64,
    pub latest_block: u64,
    pub from_block: u64,
    pub to_block: u64,
    /// Sorted by risk, then allowance. Empty when no approvals were found.
    pub rows: Vec<AllowanceRow>,
}

/// Connects, scans the owner's approvals and re-reads each one on chain.
///
/// Fails if the endpoint cannot be reached or any log query fails.
/// Metadata and allowance lookups never fail the audit.
pub async fn run_audit<R: ChainReader>(client: &R, config: &Config) -> Result<AuditOutcome> {
    let chain_id = client
        .chain_id()
        .await
        .context("Failed to connect to RPC endpoint, check --rpc")?;
    let latest_block = client
        .latest_block()
        .await
        .context("Failed to fetch latest block number")?;
    info!("Chain ID: {} | Latest block: {}", chain_id, latest_block);

    let (from_block, to_block) = resolve_range(latest_block, config.from_block, config.to_block);
    if from_block > to_block {
        warn!(
            "Start block {} is after end block {}, nothing to scan",
            from_block, to_block
        );
    }

    let scanner = Scanner::new(client, config.owner, config.step);
    let approvals = scanner.scan(from_block, to_block).await?;

    let rows = if approvals.is_empty() {
        Vec::new()
    } else {
        build_report(
            client,
            config.owner,
            &approvals,
            &config.safe_spenders,
            config.concurrency,
        )
        .await
    };

    Ok(AuditOutcome {
        chain_id,
        latest_block,
        from_block,
        to_block,
        rows,
    })
}

/// Heading and table for the first `top` rows. `None` when nothing is shown.
pub fn results_section(rows: &[AllowanceRow], top: usize) -> Option<String> {
    let shown = rows.len().min(top);
    if shown == 0 {
        return None;
    }
    Some(format!(
        "\nResults (sorted by risk and allowance size, top {shown}):\n{}",
        render_table(&rows[..shown])
    ))
}

/// Prints the report to stdout and writes any requested export files.
pub fn print_report(outcome: &AuditOutcome, config: &Config) -> Result<()> {
    println!(
        "Chain ID: {} | Latest block: {}",
        outcome.chain_id, outcome.latest_block
    );
    println!(
        "Scanned blocks {} to {} for approvals by {}",
        outcome.from_block,
        outcome.to_block,
        config.owner.to_checksum(None)
    );

    if outcome.rows.is_empty() {
        println!(
            "No approvals found. The block range may be too short, or this address has not granted any."
        );
        return Ok(());
    }

    if let Some(section) = results_section(&outcome.rows, config.top) {
        println!("{section}");
    }
    println!("{}", render_summary(&outcome.rows));

    if let Some(path) = &config.json_path {
        write_json(path, &outcome.rows)?;
        println!("\nJSON saved: {}", path.display());
    }
    if let Some(path) = &config.csv_path {
        write_csv(path, &outcome.rows)?;
        println!("\nCSV saved: {}", path.display());
    }

    println!("\nHint: to revoke, call `approve(spender, 0)` on the token contract.");
    println!("Risk tiers are advisory. Sending a revocation needs your own key and gas.");

    Ok(())
}
