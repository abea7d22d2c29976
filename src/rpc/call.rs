//! Call context and canned log messages shared by the gateway's JSON-RPC
//! operations so every call reports breaker state, timeouts and failures the
//! same way. Calls are attempted once; recovery is left to the next trigger.

use crate::rpc::circuit_breaker::CircuitState;
use anyhow::Error;
use primitive_types::H160;

macro_rules! log_with_call_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(contract) = $ctx.contract {
            tracing::$level!(
                network = $ctx.network,
                contract = ?contract,
                $($rest)*
            );
        } else {
            tracing::$level!(network = $ctx.network, $($rest)*);
        }
    }};
}

pub(crate) use log_with_call_ctx;

/// Log labels for one kind of gateway operation.
#[derive(Clone, Copy)]
pub(crate) struct CallMessages {
    pub(crate) permit: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) timeout: &'static str,
    pub(crate) failed: &'static str,
    pub(crate) rejected: Option<&'static str>,
    pub(crate) oversized: Option<&'static str>,
}

/// Passed into `call_with_breaker` so callers can attach the target contract
/// and reuse consistent messaging.
#[derive(Clone, Copy)]
pub(crate) struct CallContext<'a> {
    network: &'static str,
    contract: Option<H160>,
    messages: &'a CallMessages,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(network: &'static str, messages: &'a CallMessages) -> Self {
        Self {
            network,
            contract: None,
            messages,
        }
    }

    pub(crate) fn with_contract(
        network: &'static str,
        messages: &'a CallMessages,
        contract: H160,
    ) -> Self {
        Self {
            network,
            contract: Some(contract),
            messages,
        }
    }

    pub(crate) fn log_permit(&self, state: CircuitState) {
        log_with_call_ctx!(trace, self, breaker_state = ?state, "{}", self.messages.permit);
    }

    pub(crate) fn log_circuit_open(&self) {
        log_with_call_ctx!(warn, self, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_timeout(&self, method: &str) {
        log_with_call_ctx!(warn, self, method, "{}", self.messages.timeout);
    }

    pub(crate) fn log_failed(&self, err: &Error) {
        log_with_call_ctx!(error, self, error = %err, "{}", self.messages.failed);
    }

    pub(crate) fn log_rejected(&self, code: i32, message: &str) {
        if let Some(label) = self.messages.rejected {
            log_with_call_ctx!(warn, self, code, node_message = message, "{}", label);
        }
    }

    pub(crate) fn log_oversized(&self, method: &str) {
        if let Some(label) = self.messages.oversized {
            log_with_call_ctx!(warn, self, method, "{}", label);
        }
    }
}

pub(crate) const CHAIN_ID_CALL: CallMessages = CallMessages {
    permit: "circuit breaker permit acquired for eth_chainId",
    circuit_open: "node circuit breaker open; rejecting eth_chainId",
    timeout: "eth_chainId timed out",
    failed: "eth_chainId failed",
    rejected: None,
    oversized: None,
};

pub(crate) const CONTRACT_CALL: CallMessages = CallMessages {
    permit: "circuit breaker permit acquired for eth_call",
    circuit_open: "node circuit breaker open; rejecting contract read",
    timeout: "contract read timed out",
    failed: "contract read failed",
    rejected: Some("node rejected contract read"),
    oversized: Some("contract read response exceeded HTTP size limit"),
};

pub(crate) const FINALIZED_BLOCK_CALL: CallMessages = CallMessages {
    permit: "circuit breaker permit acquired for eth_getBlockByNumber",
    circuit_open: "node circuit breaker open; rejecting finalized block lookup",
    timeout: "finalized block lookup timed out",
    failed: "finalized block lookup failed",
    rejected: None,
    oversized: None,
};

pub(crate) const GET_LOGS_CALL: CallMessages = CallMessages {
    permit: "circuit breaker permit acquired for eth_getLogs",
    circuit_open: "node circuit breaker open; rejecting log query",
    timeout: "log query timed out",
    failed: "log query failed",
    rejected: Some("node rejected log query"),
    oversized: Some("log query response exceeded HTTP size limit; narrow the block range"),
};

pub(crate) const SUBMIT_REPORT_CALL: CallMessages = CallMessages {
    permit: "circuit breaker permit acquired for report submission",
    circuit_open: "node circuit breaker open; rejecting report submission",
    timeout: "report submission timed out",
    failed: "report submission failed",
    rejected: Some("node rejected report transaction"),
    oversized: None,
};

pub(crate) const RECEIPT_CALL: CallMessages = CallMessages {
    permit: "circuit breaker permit acquired for eth_getTransactionReceipt",
    circuit_open: "node circuit breaker open; rejecting receipt poll",
    timeout: "receipt poll timed out",
    failed: "receipt poll failed",
    rejected: None,
    oversized: None,
};
