//! Concrete workflows composed from the trigger, consensus, chain, and
//! report layers: fetch, aggregate, read chain, decide, report, write.

pub mod calculator;
pub mod contracts;
pub mod github;
pub mod issues;
pub mod messages;
pub mod reserves;

pub use calculator::{CalculatorResult, CalculatorWorkflow};
pub use issues::IssueTrackerWorkflow;
pub use messages::MessageLogHandler;
pub use reserves::{ReserveInfo, ReserveUpdate, ReserveWorkflow};

use crate::abi::{AbiFunction, Address, Token, H256};
use crate::chain::{BlockRef, ChainGateway, ChainReadResult, ChainRegistry, GasConfig};
use crate::consensus::{AggregationSpec, ConsensusError, HttpFetcher, ReplicatedFetcher};
use crate::report::{Report, ReportBuilder, ReportRequest};
use crate::runtime::error::{ErrorClass, WorkflowError};
use crate::runtime::run::{RunState, WorkflowRun};
use crate::runtime::telemetry::Telemetry;
use crate::trigger::{CronPayload, TriggerError, TriggerPayload};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Collaborators shared by every workflow, injected at construction.
#[derive(Clone)]
pub struct WorkflowContext {
    pub chains: ChainRegistry,
    pub http: Arc<dyn HttpFetcher>,
    pub replicas: ReplicatedFetcher,
    pub reports: Arc<ReportBuilder>,
    pub telemetry: Arc<Telemetry>,
}

impl WorkflowContext {
    pub fn new(
        chains: ChainRegistry,
        http: Arc<dyn HttpFetcher>,
        reports: Arc<ReportBuilder>,
        replica_count: usize,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            replicas: ReplicatedFetcher::new(replica_count, telemetry.clone()),
            chains,
            http,
            reports,
            telemetry,
        }
    }

    /// Gateway for `selector_name`. An unknown selector is a configuration
    /// error of `workflow`.
    pub fn chain(&self, workflow: &'static str, selector_name: &str) -> Result<Arc<dyn ChainGateway>> {
        self.chains
            .resolve(selector_name)
            .map_err(|err| WorkflowError::misconfigured(workflow, err).into())
    }

    /// Replicated fetch tracked as the run's fetching and aggregating stages.
    /// A failed replica is a fetch error; anything the reducers reject is a
    /// disagreement.
    pub async fn agree<T, F, Fut>(
        &self,
        run: &mut WorkflowRun,
        fetch: F,
        spec: &AggregationSpec<T>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        run.advance(RunState::Fetching);
        match self.replicas.fetch_agreed(fetch, spec).await {
            Ok(agreed) => {
                run.advance(RunState::Aggregating);
                Ok(agreed)
            }
            Err(err) => {
                let class = match err.downcast_ref::<ConsensusError>() {
                    Some(ConsensusError::ReplicaFailed { .. }) | None => ErrorClass::Fetch,
                    Some(_) => {
                        run.advance(RunState::Aggregating);
                        ErrorClass::Disagreement
                    }
                };
                Err(run.fail(class, err))
            }
        }
    }

    /// Reads `function` from `contract` at the last finalized block.
    pub async fn read(
        &self,
        chain: &dyn ChainGateway,
        contract: Address,
        function: &AbiFunction,
        args: &[Token],
    ) -> Result<ChainReadResult> {
        self.telemetry.record_chain_read();
        chain.read(contract, function, args, BlockRef::Finalized).await
    }

    pub async fn build_report(&self, payload: Vec<u8>) -> Result<Report> {
        self.reports.build_report(ReportRequest::evm(payload)).await
    }

    /// Writes `report` and fails unless the transaction succeeded. The error
    /// carries the contract-reported message when there is one.
    pub async fn submit(
        &self,
        chain: &dyn ChainGateway,
        receiver: Address,
        report: &Report,
        gas_limit: u64,
        action: &str,
    ) -> Result<H256> {
        let outcome = chain
            .write_report(receiver, report, GasConfig { gas_limit })
            .await;
        self.telemetry
            .record_write(matches!(&outcome, Ok(outcome) if outcome.is_success()));
        let tx_hash = outcome?.ensure_success(action)?;
        tracing::info!(
            network = chain.network().selector_name,
            receiver = ?receiver,
            tx_hash = ?tx_hash,
            action,
            "report written"
        );
        Ok(tx_hash)
    }

    /// Builds a report for `payload` and writes it in one step.
    pub async fn report_and_write(
        &self,
        chain: &dyn ChainGateway,
        receiver: Address,
        payload: Vec<u8>,
        gas_limit: u64,
        action: &str,
    ) -> Result<H256> {
        let report = self.build_report(payload).await?;
        self.submit(chain, receiver, &report, gas_limit, action).await
    }
}

/// Unwraps a scheduled delivery, failing the run on anything else.
pub(crate) fn expect_cron(run: &mut WorkflowRun, payload: TriggerPayload) -> Result<CronPayload> {
    match payload {
        TriggerPayload::Cron(cron) => Ok(cron),
        other => Err(run.fail(
            ErrorClass::Trigger,
            TriggerError::PayloadMismatch {
                expected: "cron",
                actual: other.kind(),
            }
            .into(),
        )),
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("chains", &self.chains)
            .field("replicas", &self.replicas.replicas())
            .field("reports", &self.reports)
            .finish()
    }
}
