use crate::events::{Approval, ApprovalEvent, decode_approval_event};
use crate::range::chunk_ranges;
use crate::rpc::ChainReader;
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// How far back the scan reaches when no start block is given.
pub const DEFAULT_LOOKBACK: u64 = 200_000;
pub const DEFAULT_STEP: u64 = 3_000;

/// Resolves the inclusive scan range, defaulting to the last
/// `DEFAULT_LOOKBACK` blocks up to `latest_block`.
pub fn resolve_range(latest_block: u64, from_block: Option<u64>, to_block: Option<u64>) -> (u64, u64) {
    let end = to_block.unwrap_or(latest_block);
    let start = from_block.unwrap_or_else(|| end.saturating_sub(DEFAULT_LOOKBACK));
    (start, end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApprovalPair {
    pub token: Address,
    pub spender: Address,
}

/// Latest `Approval` seen per (token, spender).
///
/// Events are ordered by (block number, log index), so recording the same
/// logs in any order or chunking yields the same set.
#[derive(Debug, Clone, Default)]
pub struct ApprovalSet {
    latest: HashMap<ApprovalPair, ApprovalEvent>,
}

impl ApprovalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event` unless a later one for the same pair is already held.
    /// Returns whether the set changed.
    pub fn record(&mut self, event: ApprovalEvent) -> bool {
        let key = ApprovalPair {
            token: event.token,
            spender: event.spender,
        };
        match self.latest.get(&key) {
            Some(existing)
                if (existing.block_number, existing.log_index)
                    > (event.block_number, event.log_index) =>
            {
                false
            }
            Some(existing) if *existing == event => false,
            _ => {
                self.latest.insert(key, event);
                true
            }
        }
    }

    pub fn get(&self, pair: &ApprovalPair) -> Option<&ApprovalEvent> {
        self.latest.get(pair)
    }

    /// Pairs in a deterministic order.
    pub fn pairs(&self) -> Vec<ApprovalPair> {
        let mut pairs: Vec<_> = self.latest.keys().copied().collect();
        pairs.sort();
        pairs
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

pub struct Scanner<'a, R> {
    client: &'a R,
    owner: Address,
    step: u64,
}

impl<'a, R: ChainReader> Scanner<'a, R> {
    pub fn new(client: &'a R, owner: Address, step: u64) -> Self {
        Scanner {
            client,
            owner,
            step: step.max(1),
        }
    }

    /// `Approval` events whose first indexed topic is the owner.
    pub fn approval_filter(&self) -> Filter {
        Filter::new()
            .event_signature(Approval::SIGNATURE_HASH)
            .topic1(self.owner.into_word())
    }

    /// Queries `[from_block, to_block]` chunk by chunk. Any chunk that fails
    /// aborts the whole scan.
    pub async fn scan(&self, from_block: u64, to_block: u64) -> Result<ApprovalSet> {
        let filter = self.approval_filter();
        let chunks = chunk_ranges(from_block, to_block, self.step);
        let total_chunks = chunks.len();
        let mut approvals = ApprovalSet::new();
        let mut total_logs = 0usize;

        info!(
            "Scanning blocks {} to {} for approvals by {} ({} chunks)",
            from_block, to_block, self.owner, total_chunks
        );

        for (index, (from, to)) in chunks.enumerate() {
            let logs = self
                .client
                .get_logs(&filter, from, to)
                .await
                .with_context(|| format!("Failed to fetch Approval logs for blocks {from}-{to}"))?;

            debug!(
                "Chunk {}/{}: {} logs for blocks {} to {}",
                index + 1,
                total_chunks,
                logs.len(),
                from,
                to
            );
            total_logs += logs.len();

            for log in logs {
                if log.removed {
                    warn!("Skipping removed log from {}", log.address());
                    continue;
                }
                match decode_approval_event(&log) {
                    Ok(event) => {
                        approvals.record(event);
                    }
                    Err(e) => {
                        warn!("Failed to decode approval event: {}", e);
                    }
                }
            }
        }

        info!(
            "Received {} approval logs, {} unique (token, spender) pairs",
            total_logs,
            approvals.len()
        );

        Ok(approvals)
    }
}
