//! Advisory risk heuristic for token approvals.
//!
//! The tiers flag grants worth reviewing. They are not a security proof: an
//! allowlisted router can still be exploited and an unlisted spender can be
//! perfectly legitimate.

use alloy_primitives::{Address, U256, address};
use anyhow::{Context, Result};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Allowances at or above 2^255 are treated as unlimited.
pub const INFINITE_THRESHOLD: U256 = U256::from_limbs([0, 0, 0, 1 << 63]);

const MAINNET_SAFE_SPENDERS: &[(Address, &str)] = &[
    (
        address!("0xE592427A0AEce92De3Edee1F18E0157C05861564"),
        "Uniswap V3 SwapRouter",
    ),
    (
        address!("0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"),
        "Uniswap V3 SwapRouter02",
    ),
    (
        address!("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
        "Uniswap V2 Router",
    ),
    (
        address!("0x1111111254EEB25477B68fb85Ed929f73A960582"),
        "1inch Aggregation Router",
    ),
    (
        address!("0xDef1C0ded9bec7F1a1670819833240f027b25EfF"),
        "0x Exchange Proxy",
    ),
];

/// Known-legitimate spender contracts. Built once at startup and only read
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct SafeSpenderRegistry {
    labels: HashMap<Address, String>,
}

impl SafeSpenderRegistry {
    pub fn mainnet() -> Self {
        Self::with_extra(std::iter::empty())
    }

    /// The mainnet table plus `extra` entries, which override built-in labels.
    pub fn with_extra(extra: impl IntoIterator<Item = (Address, String)>) -> Self {
        let mut labels: HashMap<Address, String> = MAINNET_SAFE_SPENDERS
            .iter()
            .map(|(address, label)| (*address, (*label).to_string()))
            .collect();
        labels.extend(extra);
        SafeSpenderRegistry { labels }
    }

    pub fn contains(&self, spender: &Address) -> bool {
        self.labels.contains_key(spender)
    }

    pub fn label(&self, spender: &Address) -> Option<&str> {
        self.labels.get(spender).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Parses a `ADDRESS=LABEL` allowlist entry.
pub fn parse_safe_spender(entry: &str) -> Result<(Address, String)> {
    let (address, label) = entry
        .split_once('=')
        .with_context(|| format!("Expected ADDRESS=LABEL, got {entry:?}"))?;
    let address = Address::from_str(address.trim())
        .with_context(|| format!("Invalid spender address: {}", address.trim()))?;
    let label = label.trim();
    if label.is_empty() {
        anyhow::bail!("Empty label for spender {}", address);
    }
    Ok((address, label.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl RiskLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Table marker: a star for high risk, a bullet for medium.
    pub fn marker(self) -> &'static str {
        match self {
            RiskLevel::High => "★",
            RiskLevel::Medium => "•",
            RiskLevel::Low => "",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Serialize for RiskLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

pub fn is_infinite(allowance: U256) -> bool {
    allowance >= INFINITE_THRESHOLD
}

/// Scores one approval. Conditions are checked from high to low and the
/// first match wins.
pub fn score(
    allowance: U256,
    balance: U256,
    spender: &Address,
    registry: &SafeSpenderRegistry,
) -> RiskLevel {
    let infinite = is_infinite(allowance);
    let allowlisted = registry.contains(spender);

    let exceeds_tenfold = !balance.is_zero() && allowance > balance.saturating_mul(U256::from(10));
    if !allowlisted && (infinite || exceeds_tenfold) {
        return RiskLevel::High;
    }

    if (!allowlisted && allowance > balance) || (infinite && allowlisted) {
        return RiskLevel::Medium;
    }

    RiskLevel::Low
}
