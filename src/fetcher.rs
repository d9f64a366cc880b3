use crate::events::{allowanceCall, balanceOfCall, decimalsCall, symbolCall};
use crate::rpc::ChainReader;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";
pub const DEFAULT_DECIMALS: u8 = 18;

/// Outcome of a best-effort read: either the live value or a default
/// substituted after the call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched<T> {
    Live(T),
    Fallback { value: T, reason: String },
}

impl<T> Fetched<T> {
    fn from_result(result: Result<T>, default: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Fetched::Live(value),
            Err(e) => Fetched::Fallback {
                value: default(),
                reason: e.to_string(),
            },
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Fetched::Live(value) | Fetched::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Fetched::Live(value) | Fetched::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Fetched::Fallback { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMeta {
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenMeta {
    fn default() -> Self {
        TokenMeta {
            symbol: UNKNOWN_SYMBOL.to_string(),
            decimals: DEFAULT_DECIMALS,
        }
    }
}

/// Live allowance and balance for one (token, spender) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAmounts {
    pub allowance: Fetched<U256>,
    pub balance: Fetched<U256>,
}

pub async fn call_contract<R, C>(reader: &R, to: Address, call: C) -> Result<C::Return>
where
    R: ChainReader,
    C: SolCall,
{
    let output = reader.call(to, call.abi_encode().into()).await?;
    Ok(C::abi_decode_returns(&output)?)
}

fn log_fallback<T>(fetched: &Fetched<T>, what: &str, address: Address) {
    if let Fetched::Fallback { reason, .. } = fetched {
        warn!("Failed to fetch {} for {}: {}, using default", what, address, reason);
    }
}

pub async fn fetch_symbol<R: ChainReader>(reader: &R, token: Address) -> Fetched<String> {
    let symbol = Fetched::from_result(call_contract(reader, token, symbolCall {}).await, || {
        UNKNOWN_SYMBOL.to_string()
    });
    log_fallback(&symbol, "symbol", token);
    symbol
}

pub async fn fetch_decimals<R: ChainReader>(reader: &R, token: Address) -> Fetched<u8> {
    let decimals = Fetched::from_result(call_contract(reader, token, decimalsCall {}).await, || {
        DEFAULT_DECIMALS
    });
    log_fallback(&decimals, "decimals", token);
    decimals
}

/// Symbol and decimals, each defaulted independently on failure.
pub async fn fetch_token_meta<R: ChainReader>(reader: &R, token: Address) -> TokenMeta {
    let symbol = fetch_symbol(reader, token).await.into_value();
    let decimals = fetch_decimals(reader, token).await.into_value();
    debug!("Token {}: {} ({} decimals)", token, symbol, decimals);
    TokenMeta { symbol, decimals }
}

pub async fn fetch_live_amounts<R: ChainReader>(
    reader: &R,
    token: Address,
    owner: Address,
    spender: Address,
) -> LiveAmounts {
    let allowance = Fetched::from_result(
        call_contract(reader, token, allowanceCall { owner, spender }).await,
        || U256::ZERO,
    );
    log_fallback(&allowance, "allowance", token);

    let balance = Fetched::from_result(
        call_contract(reader, token, balanceOfCall { owner }).await,
        || U256::ZERO,
    );
    log_fallback(&balance, "balance", token);

    LiveAmounts { allowance, balance }
}

/// Token metadata memoized for the lifetime of one report build.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: HashMap<Address, TokenMeta>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches metadata for every token not yet cached, at most `concurrency`
    /// tokens at a time.
    pub async fn prefetch<R, I>(&mut self, reader: &R, tokens: I, concurrency: usize)
    where
        R: ChainReader,
        I: IntoIterator<Item = Address>,
    {
        let mut missing: Vec<Address> = tokens
            .into_iter()
            .filter(|token| !self.entries.contains_key(token))
            .collect();
        missing.sort();
        missing.dedup();

        let fetched: Vec<(Address, TokenMeta)> = stream::iter(missing)
            .map(|token| async move { (token, fetch_token_meta(reader, token).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        self.entries.extend(fetched);
    }

    pub fn get(&self, token: &Address) -> Option<&TokenMeta> {
        self.entries.get(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
