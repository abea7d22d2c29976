//! On-chain calculator: adds an agreed off-chain integer to the value held by
//! a storage contract and reports all three numbers to the consumer.

use super::contracts;
use super::{expect_cron, WorkflowContext};
use crate::abi::{encode, Token, H256, U256};
use crate::chain::ChainGateway;
use crate::consensus::{AggregationSpec, FieldReducer, HttpFetcher, HttpRequest};
use crate::runtime::config::CalculatorConfig;
use crate::runtime::error::ErrorClass;
use crate::runtime::run::{RunState, WorkflowRun};
use crate::trigger::{require_scheduled_time, CronPayload, Trigger, TriggerHandler, TriggerPayload};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const WORKFLOW: &str = "calculator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffchainValue {
    pub value: U256,
}

impl OffchainValue {
    pub fn aggregation() -> AggregationSpec<Self> {
        AggregationSpec::new().field("value", FieldReducer::Median)
    }
}

/// Parses a plain-text unsigned decimal integer, surrounding whitespace allowed.
pub fn parse_offchain_value(body: &str) -> Result<U256> {
    let trimmed = body.trim();
    U256::from_dec_str(trimmed).map_err(|err| anyhow!("{trimmed:?} is not an unsigned integer: {err:?}"))
}

pub async fn fetch_offchain_value(http: &dyn HttpFetcher, url: &str) -> Result<OffchainValue> {
    let response = http.fetch(&HttpRequest::get(url)).await?.ensure_success()?;
    let value = parse_offchain_value(response.text()?)
        .with_context(|| format!("malformed body from {url}"))?;
    Ok(OffchainValue { value })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalculatorResult {
    pub offchain_value: U256,
    pub onchain_value: U256,
    pub final_result: U256,
    pub tx_hash: H256,
}

impl fmt::Display for CalculatorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offchain {} + onchain {} = {} (tx {:?})",
            self.offchain_value, self.onchain_value, self.final_result, self.tx_hash
        )
    }
}

/// `abi.encode(uint256 offchainValue, int256 onchainValue, uint256 finalResult)`.
pub fn encode_result(offchain_value: U256, onchain_value: U256, final_result: U256) -> Vec<u8> {
    encode(&[
        Token::Uint(offchain_value),
        Token::Int(onchain_value),
        Token::Uint(final_result),
    ])
}

pub struct CalculatorWorkflow {
    ctx: WorkflowContext,
    config: CalculatorConfig,
    gateway: Arc<dyn ChainGateway>,
}

impl CalculatorWorkflow {
    pub fn new(ctx: WorkflowContext, config: CalculatorConfig) -> Result<Self> {
        let gateway = ctx.chain(WORKFLOW, &config.evm.chain_selector_name)?;
        Ok(Self {
            ctx,
            config,
            gateway,
        })
    }

    pub fn trigger(&self) -> Trigger {
        Trigger::scheduled(&self.config.schedule)
    }

    pub async fn on_cron(&self, payload: CronPayload) -> Result<CalculatorResult> {
        let mut run = WorkflowRun::start(WORKFLOW);
        self.execute(&mut run, payload).await
    }

    async fn execute(&self, run: &mut WorkflowRun, payload: CronPayload) -> Result<CalculatorResult> {
        require_scheduled_time(&payload).map_err(|err| run.fail(ErrorClass::Trigger, err.into()))?;

        let http = self.ctx.http.clone();
        let url = self.config.api_url.clone();
        let offchain = self
            .ctx
            .agree(
                run,
                move |_replica| {
                    let http = http.clone();
                    let url = url.clone();
                    async move { fetch_offchain_value(http.as_ref(), &url).await }
                },
                &OffchainValue::aggregation(),
            )
            .await?
            .value;
        tracing::info!(workflow = WORKFLOW, offchain_value = %offchain, "fetched offchain value");

        let evm = &self.config.evm;
        let function = contracts::storage_get();
        let onchain = run
            .stage(RunState::ReadingChain, ErrorClass::ChainRead, async {
                self.ctx
                    .read(self.gateway.as_ref(), evm.storage_address, &function, &[])
                    .await?
                    .uint(0)
            })
            .await?;
        tracing::info!(workflow = WORKFLOW, onchain_value = %onchain, "read onchain value");

        let final_result = run
            .stage(RunState::Deciding, ErrorClass::Decision, async {
                onchain
                    .checked_add(offchain)
                    .with_context(|| format!("{onchain} + {offchain} overflows uint256"))
            })
            .await?;
        tracing::info!(
            workflow = WORKFLOW,
            consumer = ?evm.calculator_consumer_address,
            final_result = %final_result,
            "writing calculator result"
        );

        let report = run
            .stage(
                RunState::Reporting,
                ErrorClass::ChainWrite,
                self.ctx
                    .build_report(encode_result(offchain, onchain, final_result)),
            )
            .await?;
        let tx_hash = run
            .stage(
                RunState::Writing,
                ErrorClass::ChainWrite,
                self.ctx.submit(
                    self.gateway.as_ref(),
                    evm.calculator_consumer_address,
                    &report,
                    evm.gas_limit,
                    "write report",
                ),
            )
            .await?;
        run.succeed();

        Ok(CalculatorResult {
            offchain_value: offchain,
            onchain_value: onchain,
            final_result,
            tx_hash,
        })
    }
}

impl TriggerHandler for CalculatorWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW
    }

    fn handle(&self, payload: TriggerPayload) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut run = WorkflowRun::start(WORKFLOW);
            let cron = expect_cron(&mut run, payload)?;
            Ok(self.execute(&mut run, cron).await?.to_string())
        })
    }
}
