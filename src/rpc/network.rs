//! Chain selector names understood by the gateway and the chain ids they
//! resolve to.

use anyhow::{bail, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvmNetwork {
    pub selector_name: &'static str,
    pub chain_id: u64,
    pub testnet: bool,
}

impl fmt::Display for EvmNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chain id {})", self.selector_name, self.chain_id)
    }
}

pub const KNOWN_NETWORKS: &[EvmNetwork] = &[
    EvmNetwork {
        selector_name: "ethereum-mainnet",
        chain_id: 1,
        testnet: false,
    },
    EvmNetwork {
        selector_name: "ethereum-testnet-sepolia",
        chain_id: 11_155_111,
        testnet: true,
    },
    EvmNetwork {
        selector_name: "ethereum-testnet-sepolia-base-1",
        chain_id: 84_532,
        testnet: true,
    },
    EvmNetwork {
        selector_name: "ethereum-testnet-sepolia-arbitrum-1",
        chain_id: 421_614,
        testnet: true,
    },
    EvmNetwork {
        selector_name: "ethereum-testnet-sepolia-optimism-1",
        chain_id: 11_155_420,
        testnet: true,
    },
    EvmNetwork {
        selector_name: "avalanche-testnet-fuji",
        chain_id: 43_113,
        testnet: true,
    },
    EvmNetwork {
        selector_name: "polygon-testnet-amoy",
        chain_id: 80_002,
        testnet: true,
    },
    EvmNetwork {
        selector_name: "local-devnet",
        chain_id: 31_337,
        testnet: true,
    },
];

/// Resolves a chain selector name. Unknown names are configuration errors
/// and are reported before any node is contacted.
pub fn resolve_network(selector_name: &str) -> Result<EvmNetwork> {
    match KNOWN_NETWORKS
        .iter()
        .find(|network| network.selector_name == selector_name)
    {
        Some(network) => Ok(*network),
        None => bail!("unknown chain selector name {selector_name:?}"),
    }
}
