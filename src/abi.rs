//! Thin layer over `ethabi` for the contracts the workflows talk to: the
//! function table type, anyhow-flavoured encode/decode, keccak and hex helpers.

mod function;

pub use ethabi::{ParamType, Token};
pub use function::AbiFunction;
pub use primitive_types::{H160, H256, U256};

use anyhow::{anyhow, bail, Context, Result};
use sha3::{Digest, Keccak256};

/// 20-byte EVM account or contract address.
pub type Address = H160;

/// Standard head/tail encoding of `tokens`.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    ethabi::encode(tokens)
}

pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    ethabi::decode(types, data).map_err(|err| anyhow!("invalid ABI data: {err}"))
}

/// Keccak-256 (the pre-standard SHA-3 variant Ethereum uses everywhere).
pub fn keccak256(data: impl AsRef<[u8]>) -> H256 {
    H256::from_slice(&Keccak256::digest(data.as_ref()))
}

/// Parses a `0x`-prefixed (or bare) hex string into an address.
pub fn parse_address(value: &str) -> Result<Address> {
    let bytes = decode_hex(value).with_context(|| format!("invalid address {value}"))?;
    if bytes.len() != 20 {
        bail!("address {value} must be 20 bytes, got {}", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

/// Parses a 32-byte hex word such as a transaction hash or log topic.
pub fn parse_h256(value: &str) -> Result<H256> {
    let bytes = decode_hex(value).with_context(|| format!("invalid 32-byte word {value}"))?;
    if bytes.len() != 32 {
        bail!("word {value} must be 32 bytes, got {}", bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

/// Decodes hex with an optional `0x` prefix. Odd-length input is rejected.
pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits).context("invalid hex string")
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes.as_ref()))
}
