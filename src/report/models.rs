use crate::fetcher::TokenMeta;
use crate::report::formatters::human_amount;
use crate::risk::{self, RiskLevel, SafeSpenderRegistry};
use crate::scanner::ApprovalPair;
use alloy_primitives::{Address, U256};
use serde::{Serialize, Serializer};

fn checksummed<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&address.to_checksum(None))
}

fn decimal_string<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// One line of the approval report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowanceRow {
    #[serde(serialize_with = "checksummed")]
    pub token: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(serialize_with = "checksummed")]
    pub spender: Address,
    pub spender_tag: String,
    pub allowance: String,
    #[serde(serialize_with = "decimal_string")]
    pub allowance_raw: U256,
    pub balance: String,
    #[serde(serialize_with = "decimal_string")]
    pub balance_raw: U256,
    pub risk: RiskLevel,
}

impl AllowanceRow {
    pub fn new(
        pair: ApprovalPair,
        meta: &TokenMeta,
        allowance_raw: U256,
        balance_raw: U256,
        registry: &SafeSpenderRegistry,
    ) -> Self {
        AllowanceRow {
            token: pair.token,
            symbol: meta.symbol.clone(),
            decimals: meta.decimals,
            spender: pair.spender,
            spender_tag: registry.label(&pair.spender).unwrap_or_default().to_string(),
            allowance: human_amount(allowance_raw, meta.decimals),
            allowance_raw,
            balance: human_amount(balance_raw, meta.decimals),
            balance_raw,
            risk: risk::score(allowance_raw, balance_raw, &pair.spender, registry),
        }
    }

    pub fn is_infinite(&self) -> bool {
        risk::is_infinite(self.allowance_raw)
    }
}
