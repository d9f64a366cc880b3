use crate::report::models::AllowanceRow;
use crate::risk::RiskLevel;
use alloy_primitives::U256;
use anyhow::{Context, Result};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use std::path::Path;

const DISPLAY_PRECISION: u8 = 8;

/// Formats a raw token amount with `decimals`, rounded to at most eight
/// fractional digits with trailing zeros removed.
pub fn human_amount(value: U256, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let ten = U256::from(10);
    let (integer, fraction, width) = if decimals <= DISPLAY_PRECISION {
        let unit = ten.pow(U256::from(decimals));
        (value / unit, value % unit, decimals)
    } else {
        // A divisor past 256 bits exceeds every representable value, so it rounds to 0.
        let Some(divisor) = ten.checked_pow(U256::from(decimals - DISPLAY_PRECISION)) else {
            return "0".to_string();
        };
        let mut scaled = value / divisor;
        let remainder = value % divisor;
        if remainder >= divisor - remainder {
            scaled += U256::from(1);
        }
        let unit = ten.pow(U256::from(DISPLAY_PRECISION));
        (scaled / unit, scaled % unit, DISPLAY_PRECISION)
    };

    let fraction = format!("{:0>width$}", fraction.to_string(), width = width as usize);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{fraction}")
    }
}

fn spender_cell(row: &AllowanceRow) -> String {
    let mut spender = row.spender.to_checksum(None);
    if !row.spender_tag.is_empty() {
        spender.push_str(&format!(" ({})", row.spender_tag));
    }
    if row.is_infinite() {
        spender.push_str(" ∞");
    }
    spender
}

pub fn render_table(rows: &[AllowanceRow]) -> String {
    if rows.is_empty() {
        return "No approvals found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["!", "SYM", "TOKEN", "SPENDER", "BAL", "ALLOW", "RISK"]);

    for row in rows {
        table.add_row(vec![
            Cell::new(row.risk.marker()),
            Cell::new(&row.symbol),
            Cell::new(row.token.to_checksum(None)),
            Cell::new(spender_cell(row)),
            Cell::new(&row.balance),
            Cell::new(&row.allowance),
            Cell::new(row.risk),
        ]);
    }

    table.to_string()
}

/// Count of rows per risk tier, highest first.
pub fn render_summary(rows: &[AllowanceRow]) -> String {
    let count = |level: RiskLevel| rows.iter().filter(|row| row.risk == level).count();
    let infinite = rows.iter().filter(|row| row.is_infinite()).count();
    format!(
        "{} approvals: {} high, {} medium, {} low risk ({} unlimited)",
        rows.len(),
        count(RiskLevel::High),
        count(RiskLevel::Medium),
        count(RiskLevel::Low),
        infinite
    )
}

pub fn rows_to_json(rows: &[AllowanceRow]) -> Result<String> {
    serde_json::to_string_pretty(rows).context("Failed to serialize report to JSON")
}

pub fn rows_to_csv(rows: &[AllowanceRow]) -> Result<String> {
    let mut wtr = Writer::from_writer(vec![]);
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_json(path: &Path, rows: &[AllowanceRow]) -> Result<()> {
    std::fs::write(path, rows_to_json(rows)?)
        .with_context(|| format!("Failed to write JSON report to {}", path.display()))
}

pub fn write_csv(path: &Path, rows: &[AllowanceRow]) -> Result<()> {
    std::fs::write(path, rows_to_csv(rows)?)
        .with_context(|| format!("Failed to write CSV report to {}", path.display()))
}
