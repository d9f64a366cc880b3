use alloy::rpc::types::Log;
use alloy::sol;
use alloy_primitives::{Address, U256};
use anyhow::{Result, bail};

sol! {
    event Approval(address indexed owner, address indexed spender, uint256 value);

    function symbol() external view returns (string);
    function decimals() external view returns (uint8);
    function balanceOf(address owner) external view returns (uint256);
    function allowance(address owner, address spender) external view returns (uint256);
}

/// A decoded `Approval` log together with its position on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalEvent {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub block_number: u64,
    pub log_index: u64,
}

/// Decodes an `Approval` log leniently: the value is whatever big-endian
/// integer the data payload holds, since some tokens emit short or empty data.
pub fn decode_approval_event(log: &Log) -> Result<ApprovalEvent> {
    let topics = log.topics();
    if topics.len() < 3 {
        bail!(
            "expected 3 topics on Approval log from {}, got {}",
            log.address(),
            topics.len()
        );
    }

    let data = &log.data().data;
    let Some(value) = U256::try_from_be_slice(data) else {
        bail!(
            "Approval payload from {} is {} bytes, wider than uint256",
            log.address(),
            data.len()
        );
    };

    Ok(ApprovalEvent {
        token: log.address(),
        owner: Address::from_word(topics[1]),
        spender: Address::from_word(topics[2]),
        value,
        block_number: log.block_number.unwrap_or_default(),
        log_index: log.log_index.unwrap_or_default(),
    })
}
