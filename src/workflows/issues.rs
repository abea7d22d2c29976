//! GitHub issue tracker: mirrors closed issues of the configured repositories
//! into the issue tracker contract, crediting the authors of the pull
//! requests that closed them.

use super::contracts::{self, OnChainIssue};
use super::github::{unique_authors, GithubClient, GithubIssue, PullRequest};
use super::{expect_cron, WorkflowContext};
use crate::abi::{Address, Token, H256, U256};
use crate::batch::{BatchProcessor, BatchSummary, ItemOutcome};
use crate::chain::ChainGateway;
use crate::consensus::AggregationSpec;
use crate::runtime::config::{IssueTrackerConfig, RepositoryConfig};
use crate::runtime::error::ErrorClass;
use crate::runtime::run::{RunState, WorkflowRun};
use crate::trigger::{require_scheduled_time, CronPayload, Trigger, TriggerHandler, TriggerPayload};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

pub const WORKFLOW: &str = "issue-tracker";

/// Closed-issue listing of one repository, fetched before any of its issues
/// is processed.
struct RepositoryListing {
    repository: RepositoryConfig,
    issues: Result<Vec<GithubIssue>>,
}

impl fmt::Display for RepositoryListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.repository, f)
    }
}

struct IssueItem {
    issue: GithubIssue,
}

impl fmt::Display for IssueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.issue.number)
    }
}

pub struct IssueTrackerWorkflow {
    ctx: WorkflowContext,
    config: IssueTrackerConfig,
    gateway: Arc<dyn ChainGateway>,
    github: GithubClient,
}

impl IssueTrackerWorkflow {
    pub fn new(ctx: WorkflowContext, config: IssueTrackerConfig) -> Result<Self> {
        let gateway = ctx.chain(WORKFLOW, &config.evm.chain_selector_name)?;
        let github = GithubClient::new(
            ctx.http.clone(),
            &config.github_api_url,
            config.github_token.as_deref(),
        );
        Ok(Self {
            ctx,
            config,
            gateway,
            github,
        })
    }

    pub fn trigger(&self) -> Trigger {
        Trigger::scheduled(&self.config.schedule)
    }

    pub async fn on_cron(&self, payload: CronPayload) -> Result<BatchSummary> {
        let mut run = WorkflowRun::start(WORKFLOW);
        self.execute(&mut run, payload).await
    }

    /// Lists the closed issues of every repository (`Fetching`), then
    /// registers, credits and closes them one issue at a time (`Writing`).
    /// Only a bad trigger fails the run. Repository and issue failures are
    /// recorded in the summary.
    pub async fn execute(&self, run: &mut WorkflowRun, payload: CronPayload) -> Result<BatchSummary> {
        require_scheduled_time(&payload).map_err(|err| run.fail(ErrorClass::Trigger, err.into()))?;
        tracing::info!(
            workflow = WORKFLOW,
            run_id = run.run_id(),
            repositories = self.config.repositories.len(),
            "starting issue tracking"
        );

        run.advance(RunState::Fetching);
        let mut listings = Vec::with_capacity(self.config.repositories.len());
        for repository in &self.config.repositories {
            tracing::info!(workflow = WORKFLOW, repository = %repository, "listing closed issues");
            let issues = self.closed_issues(repository).await;
            listings.push(RepositoryListing {
                repository: repository.clone(),
                issues,
            });
        }

        run.advance(RunState::Writing);
        let summary = BatchProcessor::new("repositories")
            .with_telemetry(self.ctx.telemetry.clone())
            .for_each(listings, |listing| self.process_repository(listing))
            .await;

        for item_error in &summary.errors {
            tracing::warn!(workflow = WORKFLOW, error = %item_error, "item skipped");
        }
        tracing::info!(
            workflow = WORKFLOW,
            inspected = summary.inspected,
            processed = summary.processed_count,
            failed = summary.failed(),
            "issue tracking finished"
        );
        run.succeed();
        Ok(summary)
    }

    async fn process_repository(&self, listing: RepositoryListing) -> Result<ItemOutcome> {
        let RepositoryListing { repository, issues } = listing;
        let issues = issues?;
        tracing::info!(repository = %repository, count = issues.len(), "found closed issues");

        let items = issues.into_iter().map(|issue| IssueItem { issue }).collect();
        let repository = &repository;
        let summary = BatchProcessor::new("issues")
            .with_concurrency(self.config.issue_concurrency)
            .with_telemetry(self.ctx.telemetry.clone())
            .for_each(items, move |item| self.process_issue(repository, item.issue))
            .await;
        Ok(ItemOutcome::Nested(summary))
    }

    /// Registers the issue when the contract does not know it yet, then
    /// closes it on chain once it is closed on GitHub by at least one merged
    /// pull request. Only a registration counts as a change.
    async fn process_issue(&self, repository: &RepositoryConfig, issue: GithubIssue) -> Result<ItemOutcome> {
        let issue_id = contracts::issue_id(&repository.owner, &repository.repo, issue.number);
        let on_chain = self.read_issue(issue_id).await?;

        let mut outcome = ItemOutcome::Unchanged;
        if !on_chain.is_registered() {
            tracing::info!(repository = %repository, issue = issue.number, "registering issue");
            let payload = contracts::register_issue().encode_call(&[
                Token::String(repository.owner.clone()),
                Token::String(repository.repo.clone()),
                Token::Uint(U256::from(issue.number)),
            ])?;
            self.write(payload, "register issue").await?;
            outcome = ItemOutcome::Changed;
        }

        if !issue.is_closed() {
            return Ok(outcome);
        }
        if on_chain.is_closed {
            tracing::debug!(repository = %repository, issue = issue.number, "issue already closed on chain");
            return Ok(outcome);
        }

        let closing = self.closing_pull_requests(repository, issue.number).await?;
        if closing.is_empty() {
            tracing::debug!(repository = %repository, issue = issue.number, "no closing pull request found");
            return Ok(outcome);
        }

        let contributors = self.contributor_addresses(&unique_authors(&closing));
        if !contributors.is_empty() {
            tracing::info!(
                repository = %repository,
                issue = issue.number,
                count = contributors.len(),
                "adding contributors"
            );
            let payload = contracts::add_contributors().encode_call(&[
                issue_word(issue_id),
                Token::Array(contributors.into_iter().map(Token::Address).collect()),
            ])?;
            self.write(payload, "add contributors").await?;
        }

        tracing::info!(repository = %repository, issue = issue.number, "closing issue on chain");
        let payload = contracts::close_issue().encode_call(&[issue_word(issue_id)])?;
        self.write(payload, "close issue").await?;
        Ok(outcome)
    }

    async fn read_issue(&self, issue_id: H256) -> Result<OnChainIssue> {
        let result = self
            .ctx
            .read(
                self.gateway.as_ref(),
                self.config.evm.issue_tracker_address,
                &contracts::get_issue(),
                &[issue_word(issue_id)],
            )
            .await?;
        OnChainIssue::from_read(&result).context("failed to decode getIssue result")
    }

    async fn closed_issues(&self, repository: &RepositoryConfig) -> Result<Vec<GithubIssue>> {
        let github = self.github.clone();
        let owner = repository.owner.clone();
        let repo = repository.repo.clone();
        self.ctx
            .replicas
            .fetch_agreed(
                move |_replica| {
                    let github = github.clone();
                    let owner = owner.clone();
                    let repo = repo.clone();
                    async move { github.closed_issues(&owner, &repo).await }
                },
                &AggregationSpec::identical(),
            )
            .await
    }

    async fn closing_pull_requests(&self, repository: &RepositoryConfig, number: u64) -> Result<Vec<PullRequest>> {
        let github = self.github.clone();
        let owner = repository.owner.clone();
        let repo = repository.repo.clone();
        self.ctx
            .replicas
            .fetch_agreed(
                move |_replica| {
                    let github = github.clone();
                    let owner = owner.clone();
                    let repo = repo.clone();
                    async move { github.closing_pull_requests(&owner, &repo, number).await }
                },
                &AggregationSpec::identical(),
            )
            .await
    }

    /// Unmapped logins are skipped.
    fn contributor_addresses(&self, logins: &[String]) -> Vec<Address> {
        logins
            .iter()
            .filter_map(|login| {
                let address = self.config.contributor_mapping.get(login).copied();
                if address.is_none() {
                    tracing::warn!(login = %login, "no address mapping for GitHub user");
                }
                address
            })
            .collect()
    }

    async fn write(&self, payload: Vec<u8>, action: &str) -> Result<H256> {
        self.ctx
            .report_and_write(
                self.gateway.as_ref(),
                self.config.evm.issue_tracker_address,
                payload,
                self.config.evm.gas_limit,
                action,
            )
            .await
    }
}

fn issue_word(issue_id: H256) -> Token {
    Token::FixedBytes(issue_id.as_bytes().to_vec())
}

impl TriggerHandler for IssueTrackerWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW
    }

    fn handle(&self, payload: TriggerPayload) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut run = WorkflowRun::start(WORKFLOW);
            let cron = expect_cron(&mut run, payload)?;
            let summary = self.execute(&mut run, cron).await?;
            Ok(format!("Processed {} issues", summary.processed_count))
        })
    }
}
