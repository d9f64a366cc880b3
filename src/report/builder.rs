use crate::fetcher::{MetadataCache, fetch_live_amounts};
use crate::report::models::AllowanceRow;
use crate::risk::SafeSpenderRegistry;
use crate::rpc::ChainReader;
use crate::scanner::ApprovalSet;
use alloy_primitives::Address;
use futures::stream::{self, StreamExt};
use std::cmp::Reverse;
use tracing::info;

/// Highest risk first, then largest allowance. Stable for equal keys.
pub fn sort_rows(rows: &mut [AllowanceRow]) {
    rows.sort_by_key(|row| (Reverse(row.risk), Reverse(row.allowance_raw)));
}

/// Re-reads every approved pair on chain and returns the scored rows, sorted.
///
/// Token metadata is fetched once per token before any pair is queried. Both
/// phases keep at most `concurrency` requests in flight.
pub async fn build_report<R: ChainReader>(
    reader: &R,
    owner: Address,
    approvals: &ApprovalSet,
    registry: &SafeSpenderRegistry,
    concurrency: usize,
) -> Vec<AllowanceRow> {
    let concurrency = concurrency.max(1);
    let pairs = approvals.pairs();

    let mut metadata = MetadataCache::new();
    metadata
        .prefetch(reader, pairs.iter().map(|pair| pair.token), concurrency)
        .await;
    info!("Fetched metadata for {} tokens", metadata.len());

    let live: Vec<_> = stream::iter(pairs)
        .map(|pair| async move {
            let amounts = fetch_live_amounts(reader, pair.token, owner, pair.spender).await;
            (pair, amounts)
        })
        .buffered(concurrency)
        .collect()
        .await;

    let degraded = live
        .iter()
        .filter(|(_, amounts)| amounts.allowance.is_fallback() || amounts.balance.is_fallback())
        .count();
    if degraded > 0 {
        info!("{} pairs reported with defaulted allowance or balance", degraded);
    }

    let mut rows: Vec<AllowanceRow> = live
        .into_iter()
        .map(|(pair, amounts)| {
            let meta = metadata.get(&pair.token).cloned().unwrap_or_default();
            AllowanceRow::new(
                pair,
                &meta,
                amounts.allowance.into_value(),
                amounts.balance.into_value(),
                registry,
            )
        })
        .collect();

    sort_rows(&mut rows);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::TokenMeta;
    use crate::risk::RiskLevel;
    use crate::scanner::ApprovalPair;
    use alloy_primitives::U256;

    fn row(spender_byte: u8, allowance: u64, balance: u64) -> AllowanceRow {
        AllowanceRow::new(
            ApprovalPair {
                token: Address::repeat_byte(0x01),
                spender: Address::repeat_byte(spender_byte),
            },
            &TokenMeta::default(),
            U256::from(allowance),
            U256::from(balance),
            &SafeSpenderRegistry::mainnet(),
        )
    }

    #[test]
    fn sorts_by_risk_then_allowance() {
        let mut rows = vec![
            row(0x01, 50, 100),   // low
            row(0x02, 150, 100),  // medium
            row(0x03, 1100, 100), // high
            row(0x04, 500, 100),  // medium, larger
            row(0x05, 2000, 100), // high, larger
        ];
        sort_rows(&mut rows);

        let order: Vec<_> = rows.iter().map(|r| (r.risk, r.allowance_raw.to::<u64>())).collect();
        assert_eq!(
            order,
            vec![
                (RiskLevel::High, 2000),
                (RiskLevel::High, 1100),
                (RiskLevel::Medium, 500),
                (RiskLevel::Medium, 150),
                (RiskLevel::Low, 50),
            ]
        );
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let mut rows = vec![row(0x0a, 150, 100), row(0x0b, 150, 100), row(0x0c, 150, 100)];
        sort_rows(&mut rows);
        let spenders: Vec<_> = rows.iter().map(|r| r.spender).collect();
        assert_eq!(
            spenders,
            vec![
                Address::repeat_byte(0x0a),
                Address::repeat_byte(0x0b),
                Address::repeat_byte(0x0c)
            ]
        );
    }
}
