use crate::support::fakes::{address, context, FakeChain, FakeHttp, SEPOLIA};
use crate::support::init_tracing;
use chrono::{TimeZone, Utc};
use oracleflow::abi::{Token, U256};
use oracleflow::runtime::config::IssueTrackerConfig;
use oracleflow::workflows::contracts::{self, issue_id};
use oracleflow::{BlockRef, CronPayload, IssueTrackerWorkflow, RunState, TriggerHandler, TriggerPayload, WorkflowRun};
use serde_json::{json, Value};
use std::sync::Arc;

const TRACKER: u8 = 0x50;
const GH: &str = "https://gh.test";

fn tracker_config(repositories: Value) -> IssueTrackerConfig {
    serde_json::from_value(json!({
        "schedule": "0 0 * * * *",
        "github_api_url": GH,
        "github_token": "ghp_test",
        "repositories": repositories,
        "evm": {
            "chain_selector_name": SEPOLIA,
            "issue_tracker_address": format!("{:?}", address(TRACKER)),
        },
        "contributor_mapping": {
            "bob": format!("{:?}", address(0xb0)),
        },
        "issue_concurrency": 2
    }))
    .unwrap()
}

fn scheduled() -> CronPayload {
    CronPayload::at(Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap())
}

fn closed_issue(number: u64) -> Value {
    json!({
        "number": number,
        "title": format!("issue {number}"),
        "state": "closed",
        "user": {"login": "alice"},
        "closed_at": "2024-05-01T12:00:00Z"
    })
}

fn route_closed_issues(http: &FakeHttp, repo: &str, issues: Value) {
    http.route(
        &format!("{GH}/repos/acme/{repo}/issues?state=closed&per_page=100&sort=updated&direction=desc"),
        200,
        &issues.to_string(),
    );
}

fn route_closing_pull(http: &FakeHttp, repo: &str, number: u64, author: &str) {
    http.route(
        &format!("{GH}/repos/acme/{repo}/issues/{number}/events"),
        200,
        &json!([
            {"event": "labeled", "created_at": "2024-05-01T10:00:00Z"},
            {"event": "closed", "created_at": "2024-05-01T12:00:00Z"}
        ])
        .to_string(),
    );
    http.route(
        &format!("{GH}/repos/acme/{repo}/pulls?state=closed&sort=updated&direction=desc&per_page=100"),
        200,
        &json!([
            {"number": 7, "user": {"login": author}, "merged_at": "2024-05-01T11:50:00Z", "body": format!("Fixes #{number}")},
            {"number": 3, "user": {"login": "mallory"}, "merged_at": "2024-04-01T00:00:00Z", "body": "old"}
        ])
        .to_string(),
    );
}

fn on_chain_issue(repo: &str, number: u64, closed: bool) -> Vec<Token> {
    vec![
        Token::String("acme".into()),
        Token::String(repo.into()),
        Token::Uint(U256::from(number)),
        Token::Uint(U256::zero()),
        Token::Bool(closed),
        Token::Uint(U256::zero()),
    ]
}

fn unregistered() -> Vec<Token> {
    vec![
        Token::String(String::new()),
        Token::String(String::new()),
        Token::Uint(U256::zero()),
        Token::Uint(U256::zero()),
        Token::Bool(false),
        Token::Uint(U256::zero()),
    ]
}

fn issue_word(repo: &str, number: u64) -> Token {
    Token::FixedBytes(issue_id("acme", repo, number).as_bytes().to_vec())
}

fn tracker_chain() -> Arc<FakeChain> {
    let chain = FakeChain::new(SEPOLIA);
    chain.respond(address(TRACKER), &contracts::get_issue(), &unregistered());
    chain
}

fn set_on_chain(chain: &FakeChain, repo: &str, number: u64, closed: bool) {
    chain.respond_to(
        address(TRACKER),
        &contracts::get_issue(),
        &[issue_word(repo, number)],
        &on_chain_issue(repo, number, closed),
    );
}

#[tokio::test]
async fn registered_closed_issue_is_credited_and_closed_on_chain() {
    init_tracing();
    let chain = tracker_chain();
    set_on_chain(&chain, "widget", 42, false);
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(42)]));
    route_closing_pull(&http, "widget", 42, "bob");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let summary = workflow.on_cron(scheduled()).await.unwrap();

    assert!(summary.is_clean(), "{:?}", summary.errors);
    assert_eq!(summary.inspected, 1);
    assert_eq!(summary.processed_count, 0);
    assert!(chain.written_calls(&contracts::register_issue()).is_empty());
    assert_eq!(
        chain.written_calls(&contracts::add_contributors()),
        vec![vec![
            issue_word("widget", 42),
            Token::Array(vec![Token::Address(address(0xb0))]),
        ]]
    );
    assert_eq!(
        chain.written_calls(&contracts::close_issue()),
        vec![vec![issue_word("widget", 42)]]
    );
    let writes = chain.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|write| write.receiver == address(TRACKER)));
    assert_eq!(chain.read_blocks(), vec![BlockRef::Finalized]);
}

#[tokio::test]
async fn second_run_after_closing_writes_nothing() {
    let chain = tracker_chain();
    set_on_chain(&chain, "widget", 42, false);
    chain.respond_after_write(
        &contracts::close_issue(),
        &[issue_word("widget", 42)],
        address(TRACKER),
        &contracts::get_issue(),
        &[issue_word("widget", 42)],
        &on_chain_issue("widget", 42, true),
    );
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(42)]));
    route_closing_pull(&http, "widget", 42, "bob");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let first = workflow.on_cron(scheduled()).await.unwrap();
    let second = workflow.on_cron(scheduled()).await.unwrap();

    assert!(first.is_clean() && second.is_clean());
    assert_eq!(second.inspected, 1);
    assert_eq!(chain.written_calls(&contracts::close_issue()).len(), 1);
    assert_eq!(chain.written_calls(&contracts::add_contributors()).len(), 1);
    assert!(chain.written_calls(&contracts::register_issue()).is_empty());
    assert_eq!(chain.read_blocks(), vec![BlockRef::Finalized; 2]);
}

#[tokio::test]
async fn run_lists_every_repository_before_writing() {
    let chain = tracker_chain();
    set_on_chain(&chain, "widget", 42, false);
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(42)]));
    route_closing_pull(&http, "widget", 42, "bob");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let mut run = WorkflowRun::start("issue-tracker");
    workflow.execute(&mut run, scheduled()).await.unwrap();

    assert_eq!(
        run.trail(),
        &[
            RunState::Triggered,
            RunState::Fetching,
            RunState::Writing,
            RunState::Succeeded
        ]
    );
}

#[tokio::test]
async fn unknown_issue_is_registered_before_closing() {
    let chain = tracker_chain();
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(5)]));
    route_closing_pull(&http, "widget", 5, "bob");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let summary = workflow.on_cron(scheduled()).await.unwrap();

    assert_eq!(summary.processed_count, 1);
    assert_eq!(
        chain.written_calls(&contracts::register_issue()),
        vec![vec![
            Token::String("acme".into()),
            Token::String("widget".into()),
            Token::Uint(U256::from(5u64)),
        ]]
    );
    let selectors: Vec<[u8; 4]> = chain
        .writes()
        .iter()
        .map(|write| write.raw_report[..4].try_into().unwrap())
        .collect();
    assert_eq!(
        selectors,
        vec![
            contracts::register_issue().selector(),
            contracts::add_contributors().selector(),
            contracts::close_issue().selector(),
        ]
    );
}

#[tokio::test]
async fn unmapped_authors_still_close_the_issue() {
    let chain = tracker_chain();
    set_on_chain(&chain, "widget", 8, false);
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(8)]));
    route_closing_pull(&http, "widget", 8, "eve");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    workflow.on_cron(scheduled()).await.unwrap();

    assert!(chain.written_calls(&contracts::add_contributors()).is_empty());
    assert_eq!(chain.written_calls(&contracts::close_issue()).len(), 1);
}

#[tokio::test]
async fn issues_already_closed_on_chain_are_left_alone() {
    let chain = tracker_chain();
    set_on_chain(&chain, "widget", 42, true);
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(42)]));
    route_closing_pull(&http, "widget", 42, "bob");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http.clone()),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let summary = workflow.on_cron(scheduled()).await.unwrap();

    assert_eq!(summary.inspected, 1);
    assert!(chain.writes().is_empty());
    // Only the closed-issue listing, once per replica.
    assert_eq!(http.requests(), 3);
}

#[tokio::test]
async fn pull_requests_in_the_issue_listing_are_ignored() {
    let chain = tracker_chain();
    let http = FakeHttp::new();
    let mut pull = closed_issue(11);
    pull["pull_request"] = json!({"url": "https://gh.test/pulls/11"});
    route_closed_issues(&http, "widget", json!([pull]));
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let summary = workflow.on_cron(scheduled()).await.unwrap();

    assert_eq!(summary.inspected, 0);
    assert!(chain.writes().is_empty());
}

#[tokio::test]
async fn failing_repository_does_not_stop_the_others() {
    let chain = tracker_chain();
    set_on_chain(&chain, "gadget", 3, false);
    let http = FakeHttp::new();
    http.route(
        &format!("{GH}/repos/acme/widget/issues?state=closed&per_page=100&sort=updated&direction=desc"),
        500,
        "boom",
    );
    route_closed_issues(&http, "gadget", json!([closed_issue(3)]));
    route_closing_pull(&http, "gadget", 3, "bob");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([
            {"owner": "acme", "repo": "widget"},
            {"owner": "acme", "repo": "gadget"}
        ])),
    )
    .unwrap();

    let summary = workflow.on_cron(scheduled()).await.unwrap();

    assert_eq!(summary.failed(), 1);
    assert!(summary.errors[0].item.contains("acme/widget"));
    assert_eq!(summary.inspected, 1);
    assert_eq!(chain.written_calls(&contracts::close_issue()).len(), 1);
}

#[tokio::test]
async fn failing_issue_does_not_stop_its_siblings() {
    let chain = tracker_chain();
    set_on_chain(&chain, "widget", 1, false);
    set_on_chain(&chain, "widget", 2, false);
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(1), closed_issue(2)]));
    route_closing_pull(&http, "widget", 2, "bob");
    http.route(&format!("{GH}/repos/acme/widget/issues/1/events"), 502, "bad gateway");
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain.clone()], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let summary = workflow.on_cron(scheduled()).await.unwrap();

    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.errors[0].item, "acme/widget / #1");
    assert_eq!(summary.inspected, 1);
    assert_eq!(
        chain.written_calls(&contracts::close_issue()),
        vec![vec![issue_word("widget", 2)]]
    );
}

#[tokio::test]
async fn handler_reports_the_registration_count() {
    let chain = tracker_chain();
    let http = FakeHttp::new();
    route_closed_issues(&http, "widget", json!([closed_issue(5), closed_issue(6)]));
    for number in [5, 6] {
        http.route(&format!("{GH}/repos/acme/widget/issues/{number}/events"), 200, "[]");
    }
    let workflow = IssueTrackerWorkflow::new(
        context(&[chain], http),
        tracker_config(json!([{"owner": "acme", "repo": "widget"}])),
    )
    .unwrap();

    let summary = workflow.handle(TriggerPayload::Cron(scheduled())).await.unwrap();

    assert_eq!(summary, "Processed 2 issues");
}
