//! Minimal GitHub REST client over the [`HttpFetcher`] boundary.

use crate::consensus::{HttpFetcher, HttpRequest};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub const USER_AGENT: &str = "oracleflow";
const ACCEPT: &str = "application/vnd.github+json";
/// A pull request closes an issue when it was merged within this many
/// seconds of the issue's first `closed` event.
const CLOSING_WINDOW_SECS: i64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubUser {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubIssue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub user: Option<GithubUser>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
}

impl GithubIssue {
    /// The issues endpoint also lists pull requests.
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state == "closed" && self.closed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubComment {
    #[serde(default)]
    pub user: Option<GithubUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub event: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub user: Option<GithubUser>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Option<String>,
}

impl PullRequest {
    pub fn author(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.login.as_str())
    }

    /// Matches `#N` followed by a non-digit (or the end of the body).
    pub fn mentions_issue(&self, issue_number: u64) -> bool {
        let Some(body) = self.body.as_deref() else {
            return false;
        };
        let needle = format!("#{issue_number}");
        body.match_indices(&needle).any(|(at, _)| {
            !body[at + needle.len()..]
                .chars()
                .next()
                .is_some_and(|next| next.is_ascii_digit())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionType {
    IssueAuthor,
    Commenter,
    PrAuthor,
    PrMerger,
}

impl fmt::Display for ContributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContributionType::IssueAuthor => "issue author",
            ContributionType::Commenter => "commenter",
            ContributionType::PrAuthor => "pr author",
            ContributionType::PrMerger => "pr merger",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub login: String,
    pub contribution: ContributionType,
}

/// Pull requests merged within one hour of the first `closed` event. No
/// `closed` event means no closing pull request.
pub fn closing_pull_requests(events: &[IssueEvent], pulls: Vec<PullRequest>) -> Vec<PullRequest> {
    let Some(closed) = events.iter().find(|event| event.event == "closed") else {
        return Vec::new();
    };
    pulls
        .into_iter()
        .filter(|pull| {
            pull.merged_at.is_some_and(|merged| {
                (merged - closed.created_at).num_seconds().abs() < CLOSING_WINDOW_SECS
            })
        })
        .collect()
}

/// Unique pull request authors, in first-seen order.
pub fn unique_authors(pulls: &[PullRequest]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    pulls
        .iter()
        .filter_map(PullRequest::author)
        .filter(|login| seen.insert(*login))
        .map(str::to_owned)
        .collect()
}

#[derive(Clone)]
pub struct GithubClient {
    http: Arc<dyn HttpFetcher>,
    api_url: String,
    token: Option<String>,
}

impl GithubClient {
    /// Blank tokens are treated as absent.
    pub fn new(http: Arc<dyn HttpFetcher>, api_url: &str, token: Option<&str>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_owned(),
            token: token
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_owned),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn request(&self, path: &str) -> HttpRequest {
        let request = HttpRequest::get(format!("{}{path}", self.api_url))
            .header("Accept", ACCEPT)
            .header("User-Agent", USER_AGENT);
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.request(path);
        let response = self
            .http
            .fetch(&request)
            .await
            .with_context(|| format!("GET {} failed", request.url))?
            .ensure_success()?;
        response.json()
    }

    /// Like [`Self::get_json`], but a non-2xx status yields `None`.
    async fn get_json_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let request = self.request(path);
        let response = self
            .http
            .fetch(&request)
            .await
            .with_context(|| format!("GET {} failed", request.url))?;
        if !(200..300).contains(&response.status) {
            tracing::debug!(url = %request.url, status = response.status, "skipping optional GitHub resource");
            return Ok(None);
        }
        response.json().map(Some)
    }

    /// Most recently updated closed issues, pull requests filtered out.
    pub async fn closed_issues(&self, owner: &str, repo: &str) -> Result<Vec<GithubIssue>> {
        let issues: Vec<GithubIssue> = self
            .get_json(&format!(
                "/repos/{owner}/{repo}/issues?state=closed&per_page=100&sort=updated&direction=desc"
            ))
            .await?;
        Ok(issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .collect())
    }

    pub async fn issue(&self, owner: &str, repo: &str, number: u64) -> Result<GithubIssue> {
        self.get_json(&format!("/repos/{owner}/{repo}/issues/{number}"))
            .await
    }

    pub async fn issue_events(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<IssueEvent>> {
        self.get_json(&format!("/repos/{owner}/{repo}/issues/{number}/events"))
            .await
    }

    /// Pull requests that closed issue `number`. Both the events and the pull
    /// request listing must load; a failure on either is a fetch error.
    pub async fn closing_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<PullRequest>> {
        let events = self.issue_events(owner, repo, number).await?;
        if !events.iter().any(|event| event.event == "closed") {
            return Ok(Vec::new());
        }
        let pulls: Vec<PullRequest> = self
            .get_json(&format!(
                "/repos/{owner}/{repo}/pulls?state=closed&sort=updated&direction=desc&per_page=100"
            ))
            .await?;
        Ok(closing_pull_requests(&events, pulls))
    }

    /// Issue author, then commenters, then authors of recent pull requests
    /// mentioning the issue. Comments and pull requests are best effort.
    pub async fn issue_contributors(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<Contributor>> {
        let issue = self.issue(owner, repo, number).await?;
        let mut contributors = ContributorSet::default();
        if let Some(user) = &issue.user {
            contributors.add(&user.login, ContributionType::IssueAuthor);
        }

        let comments: Option<Vec<GithubComment>> = self
            .get_json_optional(&format!("/repos/{owner}/{repo}/issues/{number}/comments"))
            .await?;
        for comment in comments.unwrap_or_default() {
            if let Some(user) = &comment.user {
                contributors.add(&user.login, ContributionType::Commenter);
            }
        }

        let pulls: Option<Vec<PullRequest>> = self
            .get_json_optional(&format!(
                "/repos/{owner}/{repo}/pulls?state=all&sort=updated&direction=desc&per_page=10"
            ))
            .await?;
        for pull in pulls.unwrap_or_default() {
            if !pull.mentions_issue(number) {
                continue;
            }
            if let Some(login) = pull.author() {
                let contribution = if pull.merged_at.is_some() {
                    ContributionType::PrMerger
                } else {
                    ContributionType::PrAuthor
                };
                contributors.add(login, contribution);
            }
        }

        Ok(contributors.into_vec())
    }
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// First contribution wins for each login.
#[derive(Default)]
struct ContributorSet {
    seen: BTreeSet<String>,
    ordered: Vec<Contributor>,
}

impl ContributorSet {
    fn add(&mut self, login: &str, contribution: ContributionType) {
        if self.seen.insert(login.to_owned()) {
            self.ordered.push(Contributor {
                login: login.to_owned(),
                contribution,
            });
        }
    }

    fn into_vec(self) -> Vec<Contributor> {
        self.ordered
    }
}
