//! Chain gateway boundary: contract reads at a block reference, report
//! writes with a verified outcome, finalized-head and log queries, and the
//! registry that maps chain selector names to gateways.

use crate::abi::{AbiFunction, Address, Token, H256, U256};
use crate::report::Report;
use crate::rpc::EvmNetwork;
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Block at which a read is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockRef {
    /// Last finalized block; reads never act on state that can be reorganized.
    #[default]
    Finalized,
    Latest,
    Number(u64),
}

impl BlockRef {
    /// JSON-RPC block tag or quantity.
    pub fn to_rpc_param(self) -> String {
        match self {
            BlockRef::Finalized => "finalized".to_owned(),
            BlockRef::Latest => "latest".to_owned(),
            BlockRef::Number(number) => crate::rpc::helpers::quantity(number),
        }
    }
}

/// A message for `eth_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMsg {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Vec<u8>,
}

/// Gas settings attached to a report write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasConfig {
    pub gas_limit: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self { gas_limit: 500_000 }
    }
}

/// Raw and decoded result of a contract read.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainReadResult {
    pub raw: Vec<u8>,
    pub signature: String,
    pub tokens: Vec<Token>,
    pub block: BlockRef,
}

impl ChainReadResult {
    pub fn token(&self, index: usize) -> Result<&Token> {
        self.tokens
            .get(index)
            .with_context(|| format!("{} has no output {index}", self.signature))
    }

    pub fn uint(&self, index: usize) -> Result<U256> {
        self.token(index)?
            .clone()
            .into_uint()
            .with_context(|| format!("output {index} of {} is not an integer", self.signature))
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        self.token(index)?
            .clone()
            .into_bool()
            .with_context(|| format!("output {index} of {} is not a bool", self.signature))
    }

    pub fn string(&self, index: usize) -> Result<String> {
        self.token(index)?
            .clone()
            .into_string()
            .with_context(|| format!("output {index} of {} is not a string", self.signature))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    /// Reserved for asynchronous submission; writes are awaited to a terminal state.
    Pending,
    Failed,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Success => write!(f, "SUCCESS"),
            TxStatus::Pending => write!(f, "PENDING"),
            TxStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outcome of a report write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub status: TxStatus,
    /// Zero when the node never assigned a hash.
    pub tx_hash: H256,
    pub error_message: Option<String>,
}

impl TxOutcome {
    pub fn success(tx_hash: H256) -> Self {
        Self {
            status: TxStatus::Success,
            tx_hash,
            error_message: None,
        }
    }

    pub fn failed(tx_hash: Option<H256>, error_message: Option<String>) -> Self {
        Self {
            status: TxStatus::Failed,
            tx_hash: tx_hash.unwrap_or_else(H256::zero),
            error_message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }

    /// Returns the transaction hash, or a [`WriteFailed`] error carrying the
    /// contract-reported message (or the raw status when there is none).
    pub fn ensure_success(&self, action: &str) -> Result<H256> {
        if self.is_success() {
            return Ok(self.tx_hash);
        }
        Err(WriteFailed {
            action: action.to_owned(),
            status: self.status,
            tx_hash: self.tx_hash,
            message: self.error_message.clone(),
        }
        .into())
    }
}

/// A report write that did not reach `Success`.
#[derive(Debug, Clone)]
pub struct WriteFailed {
    pub action: String,
    pub status: TxStatus,
    pub tx_hash: H256,
    pub message: Option<String>,
}

impl fmt::Display for WriteFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message.as_deref().filter(|message| !message.is_empty()) {
            Some(message) => write!(f, "{} failed: {message}", self.action),
            None => write!(f, "{} failed: {}", self.action, self.status),
        }
    }
}

impl std::error::Error for WriteFailed {}

/// Filter for an `eth_getLogs` query over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topic0: Option<H256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// A log emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
}

/// Read/write access to one network.
pub trait ChainGateway: Send + Sync {
    fn network(&self) -> EvmNetwork;

    fn call_contract<'a>(
        &'a self,
        msg: &'a CallMsg,
        block: BlockRef,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Submits `report` to `receiver` and waits until the outcome is known.
    fn write_report<'a>(
        &'a self,
        receiver: Address,
        report: &'a Report,
        gas: GasConfig,
    ) -> BoxFuture<'a, Result<TxOutcome>>;

    fn finalized_block_number(&self) -> BoxFuture<'_, Result<u64>>;

    fn get_logs<'a>(&'a self, filter: &'a LogFilter) -> BoxFuture<'a, Result<Vec<EvmLog>>>;

    /// Encodes a call to `function`, evaluates it at `block` and decodes the
    /// return data with the function's declared outputs.
    fn read<'a>(
        &'a self,
        contract: Address,
        function: &'a AbiFunction,
        args: &'a [Token],
        block: BlockRef,
    ) -> BoxFuture<'a, Result<ChainReadResult>> {
        Box::pin(async move {
            let msg = CallMsg {
                from: None,
                to: contract,
                data: function.encode_call(args)?,
            };
            let raw = self
                .call_contract(&msg, block)
                .await
                .with_context(|| format!("{function} on {contract:?} failed"))?;
            let tokens = function.decode_output(&raw)?;
            Ok(ChainReadResult {
                raw,
                signature: function.signature(),
                tokens,
                block,
            })
        })
    }
}

/// Gateways keyed by chain selector name, in configuration order.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    gateways: Vec<(String, Arc<dyn ChainGateway>)>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, gateway: Arc<dyn ChainGateway>) -> Result<()> {
        let name = gateway.network().selector_name.to_owned();
        if self.gateways.iter().any(|(existing, _)| *existing == name) {
            bail!("chain selector {name} is configured more than once");
        }
        self.gateways.push((name, gateway));
        Ok(())
    }

    pub fn resolve(&self, selector_name: &str) -> Result<Arc<dyn ChainGateway>> {
        match self
            .gateways
            .iter()
            .find(|(name, _)| name == selector_name)
        {
            Some((_, gateway)) => Ok(gateway.clone()),
            None => bail!("chain selector {selector_name} is not configured"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChainGateway>> {
        self.gateways.iter().map(|(_, gateway)| gateway)
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

impl fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.gateways.iter().map(|(name, _)| name))
            .finish()
    }
}
