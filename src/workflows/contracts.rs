//! ABI descriptions of the contracts the workflows call.

use crate::abi::{keccak256, AbiFunction, ParamType, H256, U256};
use crate::chain::ChainReadResult;
use anyhow::Result;

fn uint256() -> ParamType {
    ParamType::Uint(256)
}

fn address_array() -> ParamType {
    ParamType::Array(Box::new(ParamType::Address))
}

/// ERC-20 `totalSupply()`.
pub fn total_supply() -> AbiFunction {
    AbiFunction::new("totalSupply", vec![], vec![uint256()])
}

/// Balance reader helper: native balances of each address.
pub fn get_native_balances() -> AbiFunction {
    AbiFunction::new(
        "getNativeBalances",
        vec![address_array()],
        vec![ParamType::Array(Box::new(uint256()))],
    )
}

/// Reserve manager: `updateReserves((uint256 totalMinted, uint256 totalReserve))`.
pub fn update_reserves() -> AbiFunction {
    AbiFunction::new(
        "updateReserves",
        vec![ParamType::Tuple(vec![uint256(), uint256()])],
        vec![],
    )
}

pub fn get_last_message() -> AbiFunction {
    AbiFunction::new("getLastMessage", vec![ParamType::Address], vec![ParamType::String])
}

/// Storage contract read by the calculator.
pub fn storage_get() -> AbiFunction {
    AbiFunction::new("get", vec![], vec![uint256()])
}

pub fn register_issue() -> AbiFunction {
    AbiFunction::new(
        "registerIssue",
        vec![ParamType::String, ParamType::String, uint256()],
        vec![ParamType::FixedBytes(32)],
    )
}

pub fn add_contributors() -> AbiFunction {
    AbiFunction::new(
        "addContributors",
        vec![ParamType::FixedBytes(32), address_array()],
        vec![],
    )
}

pub fn close_issue() -> AbiFunction {
    AbiFunction::new("closeIssue", vec![ParamType::FixedBytes(32)], vec![])
}

pub fn get_issue() -> AbiFunction {
    AbiFunction::new(
        "getIssue",
        vec![ParamType::FixedBytes(32)],
        vec![
            ParamType::String,
            ParamType::String,
            uint256(),
            uint256(),
            ParamType::Bool,
            uint256(),
        ],
    )
}

/// Content-derived issue identifier,
/// `keccak256(abi.encodePacked(owner, repo, uint256(number)))`. The issue
/// tracker contract derives the same key on registration.
pub fn issue_id(owner: &str, repo: &str, issue_number: u64) -> H256 {
    let mut number = [0u8; 32];
    U256::from(issue_number).to_big_endian(&mut number);
    let mut preimage = Vec::with_capacity(owner.len() + repo.len() + number.len());
    preimage.extend_from_slice(owner.as_bytes());
    preimage.extend_from_slice(repo.as_bytes());
    preimage.extend_from_slice(&number);
    keccak256(preimage)
}

/// Decoded `getIssue` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainIssue {
    pub owner: String,
    pub repo: String,
    pub issue_number: U256,
    pub total_funding: U256,
    pub is_closed: bool,
    pub contributor_count: U256,
}

impl OnChainIssue {
    pub fn from_read(result: &ChainReadResult) -> Result<Self> {
        Ok(Self {
            owner: result.string(0)?,
            repo: result.string(1)?,
            issue_number: result.uint(2)?,
            total_funding: result.uint(3)?,
            is_closed: result.bool(4)?,
            contributor_count: result.uint(5)?,
        })
    }

    /// Unregistered issues read back as a zeroed struct.
    pub fn is_registered(&self) -> bool {
        !self.issue_number.is_zero()
    }
}
