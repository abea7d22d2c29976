use crate::abi::{Address, H256};
use crate::rpc::auth::RpcCredentials;
use crate::rpc::circuit_breaker::BreakerSettings;
use crate::rpc::{resolve_network, EvmNetwork};
use crate::runtime::telemetry;
use crate::trigger::schedule::parse_schedule;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_REPLICAS: usize = 3;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_LOG_POLL_INTERVAL_SECS: u64 = 12;
const DEFAULT_GAS_LIMIT: u64 = 500_000;
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Complete oracle configuration, loaded once at startup.
///
/// Build it with [`OracleConfig::from_json`] or [`OracleConfig::load`] so
/// validation runs before any gateway or workflow observes the values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub log_poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub metrics_interval_secs: Option<u64>,
    #[serde(default)]
    pub reserves: Option<ReservesConfig>,
    #[serde(default)]
    pub issue_tracker: Option<IssueTrackerConfig>,
    #[serde(default)]
    pub calculator: Option<CalculatorConfig>,
}

impl OracleConfig {
    pub fn from_json(document: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(document).context("failed to parse oracle configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        Self::from_json(&document).with_context(|| format!("invalid configuration {}", path.display()))
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.log_poll_interval_secs
                .unwrap_or(DEFAULT_LOG_POLL_INTERVAL_SECS),
        )
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL)
    }

    pub fn chain(&self, selector_name: &str) -> Option<&ChainConfig> {
        self.chains
            .iter()
            .find(|chain| chain.chain_selector_name == selector_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("chains must list at least one network");
        }
        let mut seen = BTreeSet::new();
        for chain in &self.chains {
            chain.validate()?;
            if !seen.insert(chain.chain_selector_name.as_str()) {
                bail!(
                    "chain selector {} is configured more than once",
                    chain.chain_selector_name
                );
            }
        }

        self.consensus.validate()?;
        self.signer.validate()?;

        if self.log_poll_interval_secs == Some(0) {
            bail!("log_poll_interval_secs must be greater than 0");
        }
        if self.metrics_interval_secs == Some(0) {
            bail!("metrics_interval_secs must be greater than 0");
        }

        if let Some(reserves) = &self.reserves {
            reserves.validate(self).context("invalid reserves section")?;
        }
        if let Some(tracker) = &self.issue_tracker {
            tracker.validate(self).context("invalid issue_tracker section")?;
        }
        if let Some(calculator) = &self.calculator {
            calculator
                .validate(self)
                .context("invalid calculator section")?;
        }
        Ok(())
    }

    fn ensure_chain(&self, selector_name: &str) -> Result<()> {
        resolve_network(selector_name)?;
        if self.chain(selector_name).is_none() {
            bail!("chain selector {selector_name} is not configured");
        }
        Ok(())
    }
}

/// One EVM network and the node used to reach it.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    pub chain_selector_name: String,
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    /// Account the node signs submissions with.
    pub sender_address: Address,
    #[serde(default)]
    pub forwarder_address: Option<Address>,
    #[serde(default)]
    pub rpc_timeout_secs: Option<u64>,
    #[serde(default)]
    pub write_timeout_secs: Option<u64>,
    #[serde(default)]
    pub receipt_poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,
}

impl ChainConfig {
    pub fn network(&self) -> Result<EvmNetwork> {
        resolve_network(&self.chain_selector_name)
    }

    pub fn rpc_url(&self) -> &str {
        self.rpc_url.trim()
    }

    pub fn sender_address(&self) -> Address {
        self.sender_address
    }

    pub fn forwarder_address(&self) -> Option<Address> {
        self.forwarder_address
    }

    pub fn rpc_credentials(&self) -> Option<RpcCredentials> {
        match (&self.rpc_user, &self.rpc_password) {
            (Some(user), Some(password)) => Some(RpcCredentials {
                user: user.trim().to_owned(),
                password: password.trim().to_owned(),
            }),
            _ => None,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs.unwrap_or(DEFAULT_RPC_TIMEOUT_SECS))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(
            self.write_timeout_secs
                .unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS),
        )
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.receipt_poll_interval_ms
                .unwrap_or(DEFAULT_RECEIPT_POLL_INTERVAL_MS),
        )
    }

    pub fn validate(&self) -> Result<()> {
        self.network()?;
        validate_url(&self.rpc_url, "rpc_url")?;
        match (&self.rpc_user, &self.rpc_password) {
            (Some(user), Some(password)) => {
                ensure_not_empty(user, "rpc_user")?;
                ensure_not_empty(password, "rpc_password")?;
            }
            (None, None) => {}
            _ => bail!("rpc_user and rpc_password must be set together"),
        }
        if self.rpc_timeout().is_zero() {
            bail!("rpc_timeout_secs must be greater than 0");
        }
        if self.write_timeout().is_zero() {
            bail!("write_timeout_secs must be greater than 0");
        }
        if self.receipt_poll_interval().is_zero() {
            bail!("receipt_poll_interval_ms must be greater than 0");
        }
        if self.receipt_poll_interval() > self.write_timeout() {
            bail!("receipt_poll_interval_ms must not exceed write_timeout_secs");
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.half_open_limit == 0 {
            bail!("circuit_breaker failure_threshold and half_open_limit must be greater than 0");
        }
        Ok(())
    }
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("chain_selector_name", &self.chain_selector_name)
            .field("rpc_url", &self.rpc_url)
            .field("rpc_user", &self.rpc_user)
            .field("rpc_password", &self.rpc_password.as_ref().map(|_| "<redacted>"))
            .field("sender_address", &self.sender_address)
            .field("forwarder_address", &self.forwarder_address)
            .field("rpc_timeout_secs", &self.rpc_timeout_secs)
            .field("write_timeout_secs", &self.write_timeout_secs)
            .field("receipt_poll_interval_ms", &self.receipt_poll_interval_ms)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish()
    }
}

/// Replicated HTTP fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsensusConfig {
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl ConsensusConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            bail!("consensus.replicas must be greater than 0");
        }
        if self.http_timeout_secs == 0 {
            bail!("consensus.http_timeout_secs must be greater than 0");
        }
        if self.max_response_bytes == 0 {
            bail!("consensus.max_response_bytes must be greater than 0");
        }
        Ok(())
    }
}

fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_max_response_bytes() -> usize {
    DEFAULT_MAX_RESPONSE_BYTES
}

/// Development signer. The key never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignerConfig {
    pub private_key: String,
    #[serde(default)]
    pub config_digest: Option<H256>,
}

impl SignerConfig {
    fn validate(&self) -> Result<()> {
        let digits = self.private_key.trim();
        let digits = digits.strip_prefix("0x").unwrap_or(digits);
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("signer.private_key must be 32 bytes of hex");
        }
        Ok(())
    }
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("private_key", &"<redacted>")
            .field("config_digest", &self.config_digest)
            .finish()
    }
}

/// Proof-of-reserve workflow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservesConfig {
    pub schedule: String,
    /// Proof-of-reserve endpoint.
    pub url: String,
    /// Every network the token is minted on. The first one receives the
    /// reserve update.
    pub evms: Vec<ReserveEvmConfig>,
    #[serde(default)]
    pub github: Option<GithubIssueConfig>,
}

impl ReservesConfig {
    fn validate(&self, root: &OracleConfig) -> Result<()> {
        parse_schedule(&self.schedule)?;
        validate_url(&self.url, "url")?;
        if self.evms.is_empty() {
            bail!("evms must list at least one network");
        }
        for evm in &self.evms {
            root.ensure_chain(&evm.chain_selector_name)?;
            if evm.gas_limit == 0 {
                bail!("gas_limit must be greater than 0");
            }
        }
        if let Some(github) = &self.github {
            github.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReserveEvmConfig {
    pub chain_selector_name: String,
    pub token_address: Address,
    pub proxy_address: Address,
    pub balance_reader_address: Address,
    /// Contract whose logs drive the message handler, when set.
    #[serde(default)]
    pub message_emitter_address: Option<Address>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

/// Issue whose contributor list is verified before each reserve update.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubIssueConfig {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

impl GithubIssueConfig {
    fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.owner, "github.owner")?;
        ensure_not_empty(&self.repo, "github.repo")?;
        if self.issue_number == 0 {
            bail!("github.issue_number must be greater than 0");
        }
        validate_url(&self.api_url, "github.api_url")
    }
}

impl fmt::Debug for GithubIssueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubIssueConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("issue_number", &self.issue_number)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// GitHub issue tracker workflow.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueTrackerConfig {
    pub schedule: String,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default)]
    pub github_token: Option<String>,
    pub repositories: Vec<RepositoryConfig>,
    pub evm: IssueTrackerEvmConfig,
    /// GitHub login to payout address.
    #[serde(default)]
    pub contributor_mapping: BTreeMap<String, Address>,
    /// Issues processed at once within one repository.
    #[serde(default = "default_issue_concurrency")]
    pub issue_concurrency: usize,
}

impl IssueTrackerConfig {
    fn validate(&self, root: &OracleConfig) -> Result<()> {
        parse_schedule(&self.schedule)?;
        validate_url(&self.github_api_url, "github_api_url")?;
        if self.repositories.is_empty() {
            bail!("repositories must list at least one repository");
        }
        for repository in &self.repositories {
            ensure_not_empty(&repository.owner, "repositories[].owner")?;
            ensure_not_empty(&repository.repo, "repositories[].repo")?;
        }
        root.ensure_chain(&self.evm.chain_selector_name)?;
        if self.evm.gas_limit == 0 {
            bail!("evm.gas_limit must be greater than 0");
        }
        if self.issue_concurrency == 0 {
            bail!("issue_concurrency must be greater than 0");
        }
        Ok(())
    }
}

impl fmt::Debug for IssueTrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssueTrackerConfig")
            .field("schedule", &self.schedule)
            .field("github_api_url", &self.github_api_url)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("repositories", &self.repositories)
            .field("evm", &self.evm)
            .field("contributor_mapping", &self.contributor_mapping)
            .field("issue_concurrency", &self.issue_concurrency)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueTrackerEvmConfig {
    pub chain_selector_name: String,
    pub issue_tracker_address: Address,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

/// On-chain calculator workflow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculatorConfig {
    pub schedule: String,
    pub api_url: String,
    pub evm: CalculatorEvmConfig,
}

impl CalculatorConfig {
    fn validate(&self, root: &OracleConfig) -> Result<()> {
        parse_schedule(&self.schedule)?;
        validate_url(&self.api_url, "api_url")?;
        root.ensure_chain(&self.evm.chain_selector_name)?;
        if self.evm.gas_limit == 0 {
            bail!("evm.gas_limit must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculatorEvmConfig {
    pub chain_selector_name: String,
    pub storage_address: Address,
    pub calculator_consumer_address: Address,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_owned()
}

fn default_issue_concurrency() -> usize {
    1
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
