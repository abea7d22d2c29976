//! Proof-of-reserve updater: agreed off-chain reserve against on-chain
//! token supply, written to the reserve manager through its proxy.

use super::contracts;
use super::github::GithubClient;
use super::messages::MessageLogHandler;
use super::{expect_cron, WorkflowContext};
use crate::abi::{Token, H256, U256};
use crate::chain::ChainGateway;
use crate::consensus::{AggregationSpec, FieldReducer, HttpFetcher, HttpRequest, HttpResponse};
use crate::runtime::config::{GithubIssueConfig, ReserveEvmConfig, ReservesConfig};
use crate::runtime::error::{ErrorClass, WorkflowError};
use crate::runtime::run::{RunState, WorkflowRun};
use crate::trigger::{require_scheduled_time, CronPayload, Trigger, TriggerHandler, TriggerPayload};
use anyhow::{anyhow, bail, ensure, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const WORKFLOW: &str = "proof-of-reserve";
const RESERVE_DECIMALS_SCALE: f64 = 1e18;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PorResponse {
    total_token: f64,
    #[serde(default)]
    ripcord: bool,
    updated_at: DateTime<Utc>,
}

/// One replica's view of the reserve endpoint. Both fields reduce by median.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReserveInfo {
    /// Unix seconds.
    pub last_updated: i64,
    pub total_reserve: f64,
}

impl ReserveInfo {
    pub fn aggregation() -> AggregationSpec<Self> {
        AggregationSpec::new()
            .field("last_updated", FieldReducer::Median)
            .field("total_reserve", FieldReducer::Median)
    }
}

/// Parses a reserve endpoint response. A raised ripcord means the attestation
/// must not be used.
pub fn parse_reserve_response(response: &HttpResponse) -> Result<ReserveInfo> {
    let por: PorResponse = response.json()?;
    ensure!(!por.ripcord, "ripcord is raised on {}", response.url);
    Ok(ReserveInfo {
        last_updated: por.updated_at.timestamp(),
        total_reserve: por.total_token,
    })
}

pub async fn fetch_reserve_info(http: &dyn HttpFetcher, url: &str) -> Result<ReserveInfo> {
    let response = http.fetch(&HttpRequest::get(url)).await?.ensure_success()?;
    parse_reserve_response(&response)
}

/// Scales a reserve to 18 decimals, truncating the fractional remainder.
pub fn scale_reserve(total_reserve: f64) -> Result<U256> {
    ensure!(
        total_reserve.is_finite() && total_reserve >= 0.0,
        "total reserve {total_reserve} is not a finite non-negative amount"
    );
    let scaled = (total_reserve * RESERVE_DECIMALS_SCALE).trunc();
    U256::from_dec_str(&format!("{scaled:.0}"))
        .map_err(|err| anyhow!("scaled reserve {scaled} does not fit in uint256: {err:?}"))
}

/// Outcome of one successful reserve update.
#[derive(Debug, Clone, PartialEq)]
pub struct ReserveUpdate {
    pub reserve: ReserveInfo,
    pub total_supply: U256,
    pub total_reserve_scaled: U256,
    pub native_balance: U256,
    pub tx_hash: H256,
}

struct ReserveChain {
    gateway: Arc<dyn ChainGateway>,
    evm: ReserveEvmConfig,
}

pub struct ReserveWorkflow {
    ctx: WorkflowContext,
    config: ReservesConfig,
    chains: Vec<ReserveChain>,
    github: Option<GithubClient>,
}

impl ReserveWorkflow {
    /// Resolves every configured chain up front so an unknown selector fails
    /// before any I/O.
    pub fn new(ctx: WorkflowContext, config: ReservesConfig) -> Result<Self> {
        if config.evms.is_empty() {
            return Err(WorkflowError::misconfigured(
                WORKFLOW,
                anyhow!("reserves.evms must not be empty"),
            )
            .into());
        }
        let chains = config
            .evms
            .iter()
            .map(|evm| {
                Ok(ReserveChain {
                    gateway: ctx.chain(WORKFLOW, &evm.chain_selector_name)?,
                    evm: evm.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let github = config.github.as_ref().map(|github| {
            GithubClient::new(ctx.http.clone(), &github.api_url, github.github_token.as_deref())
        });
        Ok(Self {
            ctx,
            config,
            chains,
            github,
        })
    }

    pub fn trigger(&self) -> Trigger {
        Trigger::scheduled(&self.config.schedule)
    }

    /// Log handler for the primary chain's message emitter, when one is
    /// configured.
    pub fn message_handler(&self) -> Result<Option<MessageLogHandler>> {
        match self.primary().evm.message_emitter_address {
            Some(emitter) => Ok(Some(MessageLogHandler::new(
                self.ctx.clone(),
                &self.primary().evm.chain_selector_name,
                emitter,
            )?)),
            None => Ok(None),
        }
    }

    fn primary(&self) -> &ReserveChain {
        &self.chains[0]
    }

    pub async fn on_cron(&self, payload: CronPayload) -> Result<ReserveUpdate> {
        let mut run = WorkflowRun::start(WORKFLOW);
        self.execute(&mut run, payload).await
    }

    async fn execute(&self, run: &mut WorkflowRun, payload: CronPayload) -> Result<ReserveUpdate> {
        let scheduled = require_scheduled_time(&payload)
            .map_err(|err| run.fail(ErrorClass::Trigger, err.into()))?;
        tracing::info!(
            workflow = WORKFLOW,
            run_id = run.run_id(),
            scheduled = %scheduled,
            url = %self.config.url,
            "running proof of reserve"
        );

        if let (Some(client), Some(github)) = (&self.github, &self.config.github) {
            self.check_contributors(run, client, github).await?;
        }

        let http = self.ctx.http.clone();
        let url = self.config.url.clone();
        let reserve = self
            .ctx
            .agree(
                run,
                move |_replica| {
                    let http = http.clone();
                    let url = url.clone();
                    async move { fetch_reserve_info(http.as_ref(), &url).await }
                },
                &ReserveInfo::aggregation(),
            )
            .await?;
        tracing::info!(
            workflow = WORKFLOW,
            total_reserve = reserve.total_reserve,
            last_updated = reserve.last_updated,
            "reserve agreed"
        );

        let total_supply = run
            .stage(RunState::ReadingChain, ErrorClass::ChainRead, self.total_supply())
            .await?;
        let native_balance = run
            .stage(RunState::ReadingChain, ErrorClass::ChainRead, self.native_balance())
            .await?;
        tracing::info!(
            workflow = WORKFLOW,
            total_supply = %total_supply,
            native_balance = %native_balance,
            "chain state read"
        );

        let (total_reserve_scaled, payload) = run
            .stage(RunState::Deciding, ErrorClass::Decision, async {
                let scaled = scale_reserve(reserve.total_reserve)?;
                let payload = contracts::update_reserves().encode_call(&[Token::Tuple(vec![
                    Token::Uint(total_supply),
                    Token::Uint(scaled),
                ])])?;
                Ok((scaled, payload))
            })
            .await?;
        tracing::info!(
            workflow = WORKFLOW,
            total_supply = %total_supply,
            total_reserve_scaled = %total_reserve_scaled,
            "updating reserves"
        );

        let primary = self.primary();
        let report = run
            .stage(RunState::Reporting, ErrorClass::ChainWrite, self.ctx.build_report(payload))
            .await?;
        let tx_hash = run
            .stage(
                RunState::Writing,
                ErrorClass::ChainWrite,
                self.ctx.submit(
                    primary.gateway.as_ref(),
                    primary.evm.proxy_address,
                    &report,
                    primary.evm.gas_limit,
                    "write report",
                ),
            )
            .await?;
        run.succeed();

        Ok(ReserveUpdate {
            reserve,
            total_supply,
            total_reserve_scaled,
            native_balance,
            tx_hash,
        })
    }

    /// Contributor list of the configured issue, agreed on as a whole record.
    async fn check_contributors(
        &self,
        run: &mut WorkflowRun,
        client: &GithubClient,
        github: &GithubIssueConfig,
    ) -> Result<()> {
        let client = client.clone();
        let owner = github.owner.clone();
        let repo = github.repo.clone();
        let number = github.issue_number;
        let contributors = self
            .ctx
            .agree(
                run,
                move |_replica| {
                    let client = client.clone();
                    let owner = owner.clone();
                    let repo = repo.clone();
                    async move { client.issue_contributors(&owner, &repo, number).await }
                },
                &AggregationSpec::identical(),
            )
            .await?;

        tracing::info!(
            workflow = WORKFLOW,
            issue = %format!("{}/{}#{}", github.owner, github.repo, github.issue_number),
            count = contributors.len(),
            "issue contributors agreed"
        );
        for contributor in &contributors {
            tracing::info!(login = %contributor.login, contribution = %contributor.contribution, "contributor");
        }
        Ok(())
    }

    /// Sum of `totalSupply` over every configured chain.
    async fn total_supply(&self) -> Result<U256> {
        let function = contracts::total_supply();
        let mut total = U256::zero();
        for chain in &self.chains {
            let supply = self
                .ctx
                .read(chain.gateway.as_ref(), chain.evm.token_address, &function, &[])
                .await?
                .uint(0)?;
            total = total.checked_add(supply).with_context(|| {
                format!(
                    "total supply overflows uint256 after {}",
                    chain.evm.chain_selector_name
                )
            })?;
        }
        Ok(total)
    }

    async fn native_balance(&self) -> Result<U256> {
        let primary = self.primary();
        let result = self
            .ctx
            .read(
                primary.gateway.as_ref(),
                primary.evm.balance_reader_address,
                &contracts::get_native_balances(),
                &[Token::Array(vec![Token::Address(primary.evm.token_address)])],
            )
            .await?;
        match result.token(0)? {
            Token::Array(balances) => match balances.first() {
                Some(Token::Uint(balance)) => Ok(*balance),
                Some(other) => bail!("unexpected balance token {other:?}"),
                None => bail!("no balances returned from contract"),
            },
            other => bail!("unexpected getNativeBalances result {other:?}"),
        }
    }
}

impl TriggerHandler for ReserveWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW
    }

    fn handle(&self, payload: TriggerPayload) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut run = WorkflowRun::start(WORKFLOW);
            let cron = expect_cron(&mut run, payload)?;
            let update = self.execute(&mut run, cron).await?;
            Ok(update.reserve.total_reserve.to_string())
        })
    }
}
