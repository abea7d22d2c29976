//! `EvmRpcGateway`: the JSON-RPC implementation of [`ChainGateway`] for one
//! EVM network. Reads go through `eth_call` at a block reference, writes
//! submit the signed report and poll for the receipt until the outcome is
//! known or the write timeout elapses.

use crate::abi::{parse_address, parse_h256, to_hex, AbiFunction, Address, ParamType, Token, H256};
use crate::chain::{BlockRef, CallMsg, ChainGateway, EvmLog, GasConfig, LogFilter, TxOutcome};
use crate::report::Report;
use crate::rpc::auth::{build_rpc_headers, RpcCredentials};
use crate::rpc::call::{
    CallContext, CHAIN_ID_CALL, CONTRACT_CALL, FINALIZED_BLOCK_CALL, GET_LOGS_CALL, RECEIPT_CALL,
    SUBMIT_REPORT_CALL,
};
use crate::rpc::circuit_breaker::{CircuitBreakerError, RpcCircuitBreaker};
use crate::rpc::helpers::{parse_quantity, quantity};
use crate::rpc::metrics::{CallOutcome, RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::network::EvmNetwork;
use crate::rpc::options::EvmGatewayOptions;
use crate::runtime::config::ChainConfig;
use anyhow::{anyhow, bail, ensure, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::http_helpers::HttpError;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{fmt, future::Future, sync::Arc};
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug)]
pub enum RpcError {
    Timeout {
        method: &'static str,
    },
    CircuitOpen,
    ResponseTooLarge {
        method: &'static str,
    },
    /// The node answered with a JSON-RPC error object (revert, bad params).
    Node {
        method: &'static str,
        code: i32,
        message: String,
    },
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::CircuitOpen => write!(f, "rpc circuit breaker is open"),
            RpcError::ResponseTooLarge { method } => {
                write!(f, "rpc {method} response exceeded HTTP size limits")
            }
            RpcError::Node {
                method,
                code,
                message,
            } => write!(f, "rpc {method} rejected by node (code={code}): {message}"),
        }
    }
}

impl std::error::Error for RpcError {}

fn forwarder_report_fn() -> AbiFunction {
    AbiFunction::new(
        "report",
        vec![
            ParamType::Address,
            ParamType::Bytes,
            ParamType::Bytes,
            ParamType::Array(Box::new(ParamType::Bytes)),
        ],
        Vec::new(),
    )
}

fn receiver_on_report_fn() -> AbiFunction {
    AbiFunction::new("onReport", vec![ParamType::Bytes, ParamType::Bytes], Vec::new())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    status: Option<String>,
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBlockHeader {
    number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
}

impl RawLog {
    fn into_log(self) -> Result<EvmLog> {
        let topics = self
            .topics
            .iter()
            .map(|topic| parse_h256(topic))
            .collect::<Result<Vec<_>>>()?;
        Ok(EvmLog {
            address: parse_address(&self.address)?,
            topics,
            data: crate::abi::decode_hex(&self.data).context("invalid log data")?,
            block_number: self
                .block_number
                .as_deref()
                .map(parse_quantity)
                .transpose()?
                .unwrap_or_default(),
            tx_hash: self
                .transaction_hash
                .as_deref()
                .map(parse_h256)
                .transpose()?
                .unwrap_or_else(H256::zero),
            log_index: self
                .log_index
                .as_deref()
                .map(parse_quantity)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EvmRpcGateway {
    network: EvmNetwork,
    rpc_url: Arc<String>,
    sender: Address,
    forwarder: Option<Address>,
    client: HttpClient,
    options: EvmGatewayOptions,
    metrics: Arc<RpcMetrics>,
    breaker: Arc<RpcCircuitBreaker>,
}

impl ChainGateway for EvmRpcGateway {
    fn network(&self) -> EvmNetwork {
        self.network
    }

    fn call_contract<'a>(
        &'a self,
        msg: &'a CallMsg,
        block: BlockRef,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(self.eth_call(msg, block))
    }

    fn write_report<'a>(
        &'a self,
        receiver: Address,
        report: &'a Report,
        gas: GasConfig,
    ) -> BoxFuture<'a, Result<TxOutcome>> {
        Box::pin(self.submit_report(receiver, report, gas))
    }

    fn finalized_block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.finalized_block())
    }

    fn get_logs<'a>(&'a self, filter: &'a LogFilter) -> BoxFuture<'a, Result<Vec<EvmLog>>> {
        Box::pin(self.logs(filter))
    }
}

impl EvmRpcGateway {
    pub fn new(network: EvmNetwork, url: impl Into<String>, sender: Address) -> Result<Self> {
        Self::with_options(network, url, sender, EvmGatewayOptions::default())
    }

    pub fn with_options(
        network: EvmNetwork,
        url: impl Into<String>,
        sender: Address,
        options: EvmGatewayOptions,
    ) -> Result<Self> {
        Self::with_options_and_breaker(
            network,
            url,
            sender,
            None,
            options,
            Arc::new(RpcCircuitBreaker::default()),
        )
    }

    pub fn with_options_and_breaker(
        network: EvmNetwork,
        url: impl Into<String>,
        sender: Address,
        credentials: Option<&RpcCredentials>,
        options: EvmGatewayOptions,
        breaker: Arc<RpcCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let headers = build_rpc_headers(credentials)?;
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client for {network}: {err}"))?;

        Ok(Self {
            network,
            rpc_url: Arc::new(rpc_url),
            sender,
            forwarder: None,
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
            breaker,
        })
    }

    /// Builds a gateway from a validated chain section. The selector name is
    /// resolved first so an unknown network fails before any I/O.
    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let network = config.network()?;
        let options = EvmGatewayOptions::default()
            .with_request_timeout(config.rpc_timeout())
            .with_write_timeout(config.write_timeout())
            .with_receipt_poll_interval(config.receipt_poll_interval());
        let gateway = Self::with_options_and_breaker(
            network,
            config.rpc_url().to_owned(),
            config.sender_address(),
            config.rpc_credentials().as_ref(),
            options,
            Arc::new(RpcCircuitBreaker::from_settings(
                network.selector_name,
                config.circuit_breaker,
            )),
        )?;
        Ok(match config.forwarder_address() {
            Some(forwarder) => gateway.with_forwarder(forwarder),
            None => gateway,
        })
    }

    /// Routes report writes through a forwarder contract instead of calling
    /// the receiver's `onReport` directly.
    pub fn with_forwarder(mut self, forwarder: Address) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let raw: String = self
            .call_with_breaker(
                CallContext::new(self.network.selector_name, &CHAIN_ID_CALL),
                || self.request("eth_chainId", rpc_params![]),
            )
            .await?;
        parse_quantity(&raw)
    }

    /// Confirms the endpoint serves the network it was configured for.
    pub async fn verify_network(&self) -> Result<()> {
        let chain_id = self.chain_id().await?;
        ensure!(
            chain_id == self.network.chain_id,
            "{} at {} reports chain id {chain_id}, expected {}",
            self.network.selector_name,
            self.rpc_url,
            self.network.chain_id
        );
        tracing::info!(network = self.network.selector_name, chain_id, "network verified");
        Ok(())
    }

    pub async fn eth_call(&self, msg: &CallMsg, block: BlockRef) -> Result<Vec<u8>> {
        let mut call = json!({
            "to": to_hex(msg.to),
            "data": to_hex(&msg.data),
        });
        if let Some(from) = msg.from {
            call["from"] = Value::String(to_hex(from));
        }

        let raw: String = self
            .call_with_breaker(
                CallContext::with_contract(self.network.selector_name, &CONTRACT_CALL, msg.to),
                || self.request("eth_call", rpc_params![call.clone(), block.to_rpc_param()]),
            )
            .await?;
        crate::abi::decode_hex(&raw).context("eth_call returned invalid hex")
    }

    pub async fn finalized_block(&self) -> Result<u64> {
        let header: Option<RawBlockHeader> = self
            .call_with_breaker(
                CallContext::new(self.network.selector_name, &FINALIZED_BLOCK_CALL),
                || self.request("eth_getBlockByNumber", rpc_params!["finalized", false]),
            )
            .await?;
        let header = header.context("node has no finalized block yet")?;
        parse_quantity(&header.number)
    }

    pub async fn logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>> {
        ensure!(
            filter.from_block <= filter.to_block,
            "log filter range {}..={} is empty",
            filter.from_block,
            filter.to_block
        );
        let addresses: Vec<String> = filter.addresses.iter().map(to_hex).collect();
        let topics: Vec<Value> = match filter.topic0 {
            Some(topic0) => vec![Value::String(to_hex(topic0))],
            None => Vec::new(),
        };
        let query = json!({
            "address": addresses,
            "topics": topics,
            "fromBlock": quantity(filter.from_block),
            "toBlock": quantity(filter.to_block),
        });

        let raw: Vec<RawLog> = self
            .call_with_breaker(
                CallContext::new(self.network.selector_name, &GET_LOGS_CALL),
                || self.request("eth_getLogs", rpc_params![query.clone()]),
            )
            .await?;
        let logs = raw
            .into_iter()
            .map(RawLog::into_log)
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            network = self.network.selector_name,
            from_block = filter.from_block,
            to_block = filter.to_block,
            count = logs.len(),
            "fetched logs"
        );
        Ok(logs)
    }

    /// Sends the report transaction and waits for its receipt. A node-side
    /// rejection of the submission is a `Failed` outcome, not an error;
    /// transport failures and receipt timeouts are errors.
    pub async fn submit_report(
        &self,
        receiver: Address,
        report: &Report,
        gas: GasConfig,
    ) -> Result<TxOutcome> {
        let (to, data) = self.report_call(receiver, report)?;
        let transaction = json!({
            "from": to_hex(self.sender),
            "to": to_hex(to),
            "data": to_hex(&data),
            "gas": quantity(gas.gas_limit),
        });

        let context = CallContext::with_contract(self.network.selector_name, &SUBMIT_REPORT_CALL, to);
        let submitted: Result<String> = self
            .call_with_breaker(context, || {
                self.request("eth_sendTransaction", rpc_params![transaction.clone()])
            })
            .await;

        let tx_hash = match submitted {
            Ok(raw) => parse_h256(&raw)?,
            Err(err) => {
                if let Some(RpcError::Node { message, .. }) = err.downcast_ref::<RpcError>() {
                    self.metrics.record_report(false);
                    return Ok(TxOutcome::failed(None, Some(message.clone())));
                }
                return Err(err);
            }
        };

        tracing::info!(
            network = self.network.selector_name,
            receiver = ?receiver,
            tx_hash = ?tx_hash,
            gas_limit = gas.gas_limit,
            "report transaction submitted"
        );

        let receipt = self.wait_for_receipt(tx_hash).await?;
        let succeeded = match receipt.status.as_deref() {
            Some(status) => parse_quantity(status)? == 1,
            None => bail!("receipt for {tx_hash:?} carries no status"),
        };
        self.metrics.record_report(succeeded);

        if succeeded {
            return Ok(TxOutcome::success(tx_hash));
        }

        let reason = self.revert_reason(to, &data, receipt.block_number.as_deref()).await;
        tracing::warn!(
            network = self.network.selector_name,
            tx_hash = ?tx_hash,
            reason = reason.as_deref().unwrap_or("unknown"),
            "report transaction reverted"
        );
        Ok(TxOutcome::failed(Some(tx_hash), reason))
    }

    fn report_call(&self, receiver: Address, report: &Report) -> Result<(Address, Vec<u8>)> {
        match self.forwarder {
            Some(forwarder) => {
                let signatures = report
                    .signatures()
                    .iter()
                    .map(|signature| Token::Bytes(signature.clone()))
                    .collect();
                let data = forwarder_report_fn().encode_call(&[
                    Token::Address(receiver),
                    Token::Bytes(report.raw_report().to_vec()),
                    Token::Bytes(report.report_context().to_vec()),
                    Token::Array(signatures),
                ])?;
                Ok((forwarder, data))
            }
            None => {
                let data = receiver_on_report_fn().encode_call(&[
                    Token::Bytes(report.report_context().to_vec()),
                    Token::Bytes(report.raw_report().to_vec()),
                ])?;
                Ok((receiver, data))
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<RawReceipt> {
        let deadline = Instant::now() + self.options.write_timeout;
        let hash = to_hex(tx_hash);

        loop {
            let receipt: Option<RawReceipt> = self
                .call_with_breaker(
                    CallContext::new(self.network.selector_name, &RECEIPT_CALL),
                    || self.request("eth_getTransactionReceipt", rpc_params![hash.clone()]),
                )
                .await?;

            if let Some(receipt) = receipt {
                ensure!(
                    parse_h256(&receipt.transaction_hash)? == tx_hash,
                    "node returned a receipt for a different transaction"
                );
                return Ok(receipt);
            }

            if Instant::now() + self.options.receipt_poll_interval > deadline {
                bail!(
                    "timed out after {:?} waiting for receipt of {hash}",
                    self.options.write_timeout
                );
            }
            sleep(self.options.receipt_poll_interval).await;
        }
    }

    /// Replays a reverted call to recover the node's revert message.
    async fn revert_reason(
        &self,
        to: Address,
        data: &[u8],
        block_number: Option<&str>,
    ) -> Option<String> {
        let block = block_number
            .and_then(|raw| parse_quantity(raw).ok())
            .map(BlockRef::Number)
            .unwrap_or(BlockRef::Latest);
        let replay = CallMsg {
            from: Some(self.sender),
            to,
            data: data.to_vec(),
        };
        match self.eth_call(&replay, block).await {
            Ok(_) => None,
            Err(err) => match err.downcast_ref::<RpcError>() {
                Some(RpcError::Node { message, .. }) => Some(message.clone()),
                _ => None,
            },
        }
    }

    /// Single-attempt wrapper: breaker gate, metrics and logging. Node-side
    /// rejections count as healthy round trips for the breaker.
    async fn call_with_breaker<T, F, Fut>(&self, context: CallContext<'_>, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.breaker.before_request() {
            Ok(state) => context.log_permit(state),
            Err(CircuitBreakerError::CircuitOpen) => {
                context.log_circuit_open();
                return Err(RpcError::CircuitOpen.into());
            }
        }

        let start = Instant::now();
        let result = operation().await;
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                self.metrics.record_call(CallOutcome::Answered, elapsed);
                self.breaker.record_success();
            }
            Err(err) => match err.downcast_ref::<RpcError>() {
                Some(RpcError::Node { code, message, .. }) => {
                    self.metrics.record_call(CallOutcome::Rejected, elapsed);
                    self.breaker.record_success();
                    context.log_rejected(*code, message);
                }
                Some(RpcError::Timeout { method }) => {
                    self.metrics.record_call(CallOutcome::TimedOut, elapsed);
                    self.breaker.record_failure();
                    context.log_timeout(method);
                }
                Some(RpcError::ResponseTooLarge { method }) => {
                    self.metrics.record_call(CallOutcome::Failed, elapsed);
                    self.breaker.record_failure();
                    context.log_oversized(method);
                }
                _ => {
                    self.metrics.record_call(CallOutcome::Failed, elapsed);
                    self.breaker.record_failure();
                    context.log_failed(err);
                }
            },
        }

        result
    }

    async fn request<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        timeout(
            self.options.request_timeout,
            self.client.request(method, params),
        )
        .await
        .map_err(|_| RpcError::Timeout { method })?
        .map_err(|err| map_rpc_error(method, err))
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method }.into();
    }
    match err {
        JsonRpcError::Call(object) => RpcError::Node {
            method,
            code: object.code(),
            message: object.message().to_owned(),
        }
        .into(),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}

fn response_too_large(err: &JsonRpcError) -> bool {
    match err {
        JsonRpcError::Transport(inner) => match inner.downcast_ref::<HttpTransportError>() {
            Some(HttpTransportError::Http(http_err)) => matches!(http_err, HttpError::TooLarge),
            Some(HttpTransportError::RequestTooLarge) => true,
            _ => false,
        },
        _ => false,
    }
}
