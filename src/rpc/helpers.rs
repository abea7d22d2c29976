//! Hex quantity and data helpers for the Ethereum JSON-RPC wire format.

use anyhow::{bail, Context, Result};

/// Encodes a quantity as minimal `0x`-prefixed hex (`0x0` for zero).
pub fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Parses a `0x`-prefixed hex quantity into a `u64`.
pub fn parse_quantity(value: &str) -> Result<u64> {
    let digits = strip_hex_prefix(value)?;
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {value}"))
}

fn strip_hex_prefix(value: &str) -> Result<&str> {
    match value.trim().strip_prefix("0x") {
        Some("") => bail!("empty hex quantity {value}"),
        Some(digits) => Ok(digits),
        None => bail!("hex quantity {value} is missing its 0x prefix"),
    }
}
