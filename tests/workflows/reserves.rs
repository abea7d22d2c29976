use crate::support::fakes::{address, context, FakeChain, FakeHttp, BASE_SEPOLIA, SEPOLIA};
use crate::support::init_tracing;
use chrono::{TimeZone, Utc};
use oracleflow::abi::{Token, U256};
use oracleflow::runtime::config::ReservesConfig;
use oracleflow::workflows::contracts;
use oracleflow::{
    BlockRef, CronPayload, ErrorClass, ReserveWorkflow, RunState, TriggerHandler, TriggerPayload, WorkflowError,
};
use serde_json::json;
use std::sync::Arc;

const POR_URL: &str = "https://por.test/reserves";

fn por_body(total_token: f64) -> String {
    json!({
        "accountName": "TrueUSD",
        "totalTrust": total_token,
        "totalToken": total_token,
        "ripcord": false,
        "updatedAt": "2024-05-01T12:00:00Z"
    })
    .to_string()
}

fn reserves_config(evms: serde_json::Value) -> ReservesConfig {
    serde_json::from_value(json!({
        "schedule": "0 */10 * * * *",
        "url": POR_URL,
        "evms": evms,
    }))
    .unwrap()
}

fn sepolia_evm() -> serde_json::Value {
    json!({
        "chain_selector_name": SEPOLIA,
        "token_address": format!("{:?}", address(0x10)),
        "proxy_address": format!("{:?}", address(0x20)),
        "balance_reader_address": format!("{:?}", address(0x30)),
        "gas_limit": 750000
    })
}

fn scheduled() -> CronPayload {
    CronPayload::at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
}

fn stock_chain(supply: u64) -> Arc<FakeChain> {
    let chain = FakeChain::new(SEPOLIA);
    chain.respond(address(0x10), &contracts::total_supply(), &[Token::Uint(U256::from(supply))]);
    chain.respond(
        address(0x30),
        &contracts::get_native_balances(),
        &[Token::Array(vec![Token::Uint(U256::from(7u64))])],
    );
    chain
}

fn failure_class(err: &anyhow::Error) -> ErrorClass {
    err.downcast_ref::<WorkflowError>()
        .expect("error is tagged with the failing stage")
        .class()
}

#[tokio::test]
async fn median_reserve_and_supply_are_written_to_the_proxy() {
    init_tracing();
    let chain = stock_chain(500);
    let http = FakeHttp::new();
    http.queue(
        POR_URL,
        &[(200, &por_body(100.0)), (200, &por_body(101.0)), (200, &por_body(99.5))],
    );
    let workflow =
        ReserveWorkflow::new(context(&[chain.clone()], http.clone()), reserves_config(json!([sepolia_evm()])))
            .unwrap();

    let update = workflow.on_cron(scheduled()).await.unwrap();

    assert_eq!(update.reserve.total_reserve, 100.0);
    assert_eq!(update.total_supply, U256::from(500u64));
    assert_eq!(update.native_balance, U256::from(7u64));
    let scaled = U256::from_dec_str("100000000000000000000").unwrap();
    assert_eq!(update.total_reserve_scaled, scaled);

    let writes = chain.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].receiver, address(0x20));
    assert_eq!(writes[0].gas_limit, 750_000);
    let calls = chain.written_calls(&contracts::update_reserves());
    assert_eq!(
        calls,
        vec![vec![Token::Tuple(vec![
            Token::Uint(U256::from(500u64)),
            Token::Uint(scaled),
        ])]]
    );
    assert_eq!(http.requests(), 3);
    assert_eq!(chain.read_blocks(), vec![BlockRef::Finalized; 2]);
}

#[tokio::test]
async fn supply_is_summed_over_every_configured_chain() {
    let sepolia = stock_chain(500);
    let base = FakeChain::new(BASE_SEPOLIA);
    base.respond(address(0x11), &contracts::total_supply(), &[Token::Uint(U256::from(250u64))]);
    let http = FakeHttp::new();
    http.route(POR_URL, 200, &por_body(42.0));
    let base_evm = json!({
        "chain_selector_name": BASE_SEPOLIA,
        "token_address": format!("{:?}", address(0x11)),
        "proxy_address": format!("{:?}", address(0x21)),
        "balance_reader_address": format!("{:?}", address(0x31)),
    });
    let workflow = ReserveWorkflow::new(
        context(&[sepolia.clone(), base.clone()], http),
        reserves_config(json!([sepolia_evm(), base_evm])),
    )
    .unwrap();

    let update = workflow.on_cron(scheduled()).await.unwrap();

    assert_eq!(update.total_supply, U256::from(750u64));
    assert_eq!(sepolia.writes().len(), 1);
    assert!(base.writes().is_empty());
    assert_eq!(base.read_blocks(), vec![BlockRef::Finalized]);
    assert!(sepolia
        .read_blocks()
        .iter()
        .all(|block| *block == BlockRef::Finalized));
}

#[tokio::test]
async fn negative_reserve_is_a_decision_error() {
    let chain = stock_chain(500);
    let http = FakeHttp::new();
    http.route(POR_URL, 200, &por_body(-5.0));
    let workflow =
        ReserveWorkflow::new(context(&[chain.clone()], http), reserves_config(json!([sepolia_evm()])))
            .unwrap();

    let err = workflow.on_cron(scheduled()).await.unwrap_err();

    let workflow_error = err.downcast_ref::<WorkflowError>().unwrap();
    assert_eq!(workflow_error.class(), ErrorClass::Decision);
    assert_eq!(workflow_error.stage(), RunState::Deciding);
    assert!(format!("{err:#}").contains("not a finite non-negative amount"));
    assert!(chain.writes().is_empty());
}

#[tokio::test]
async fn unknown_chain_selector_is_a_config_error() {
    let chain = stock_chain(500);
    let mut evm = sepolia_evm();
    evm["chain_selector_name"] = json!(BASE_SEPOLIA);

    let err = ReserveWorkflow::new(context(&[chain], FakeHttp::new()), reserves_config(json!([evm])))
        .err()
        .expect("base sepolia is not registered");

    let workflow_error = err.downcast_ref::<WorkflowError>().unwrap();
    assert_eq!(workflow_error.class(), ErrorClass::Config);
    assert_eq!(workflow_error.stage(), RunState::Idle);
    assert!(format!("{err:#}").contains("is not configured"));
}

#[tokio::test]
async fn missing_scheduled_time_fails_before_any_fetch() {
    let chain = stock_chain(500);
    let http = FakeHttp::new();
    http.route(POR_URL, 200, &por_body(100.0));
    let workflow =
        ReserveWorkflow::new(context(&[chain.clone()], http.clone()), reserves_config(json!([sepolia_evm()])))
            .unwrap();

    let err = workflow
        .on_cron(CronPayload {
            scheduled_execution_time: None,
        })
        .await
        .unwrap_err();

    assert_eq!(failure_class(&err), ErrorClass::Trigger);
    assert_eq!(http.requests(), 0);
    assert_eq!(chain.interactions(), 0);
}

#[tokio::test]
async fn raised_ripcord_aborts_before_reading_the_chain() {
    let chain = stock_chain(500);
    let http = FakeHttp::new();
    http.route(
        POR_URL,
        200,
        &json!({"totalToken": 100.0, "ripcord": true, "updatedAt": "2024-05-01T12:00:00Z"}).to_string(),
    );
    let workflow =
        ReserveWorkflow::new(context(&[chain.clone()], http), reserves_config(json!([sepolia_evm()])))
            .unwrap();

    let err = workflow.on_cron(scheduled()).await.unwrap_err();

    assert_eq!(failure_class(&err), ErrorClass::Fetch);
    assert!(format!("{err:#}").contains("ripcord"));
    assert_eq!(chain.interactions(), 0);
}

#[tokio::test]
async fn one_failing_replica_fails_the_run() {
    let chain = stock_chain(500);
    let http = FakeHttp::new();
    http.queue(POR_URL, &[(200, &por_body(100.0)), (503, "unavailable"), (200, &por_body(100.0))]);
    let workflow =
        ReserveWorkflow::new(context(&[chain.clone()], http), reserves_config(json!([sepolia_evm()])))
            .unwrap();

    let err = workflow.on_cron(scheduled()).await.unwrap_err();

    assert_eq!(failure_class(&err), ErrorClass::Fetch);
    assert!(chain.writes().is_empty());
}

#[tokio::test]
async fn rejected_write_surfaces_the_contract_message() {
    let chain = stock_chain(500);
    chain.fail_writes_of(&contracts::update_reserves(), Some("reserves are stale"));
    let http = FakeHttp::new();
    http.route(POR_URL, 200, &por_body(100.0));
    let workflow =
        ReserveWorkflow::new(context(&[chain.clone()], http), reserves_config(json!([sepolia_evm()])))
            .unwrap();

    let err = workflow.on_cron(scheduled()).await.unwrap_err();

    assert_eq!(failure_class(&err), ErrorClass::ChainWrite);
    assert!(format!("{err:#}").contains("write report failed: reserves are stale"));
}

#[tokio::test]
async fn handler_reports_the_agreed_reserve() {
    let chain = stock_chain(500);
    let http = FakeHttp::new();
    http.route(POR_URL, 200, &por_body(123.5));
    let workflow =
        ReserveWorkflow::new(context(&[chain], http), reserves_config(json!([sepolia_evm()]))).unwrap();

    let summary = workflow.handle(TriggerPayload::Cron(scheduled())).await.unwrap();

    assert_eq!(summary, "123.5");
}

#[tokio::test]
async fn contributor_check_runs_before_the_reserve_fetch() {
    let chain = stock_chain(500);
    let http = FakeHttp::new();
    http.route(POR_URL, 200, &por_body(100.0));
    http.route(
        "https://gh.test/repos/acme/widget/issues/9",
        200,
        &json!({"number": 9, "state": "open", "user": {"login": "alice"}}).to_string(),
    );
    http.route(
        "https://gh.test/repos/acme/widget/issues/9/comments",
        200,
        &json!([{"user": {"login": "carol"}}]).to_string(),
    );
    let mut config = reserves_config(json!([sepolia_evm()]));
    config.github = Some(
        serde_json::from_value(json!({
            "owner": "acme",
            "repo": "widget",
            "issue_number": 9,
            "api_url": "https://gh.test"
        }))
        .unwrap(),
    );
    let workflow = ReserveWorkflow::new(context(&[chain.clone()], http.clone()), config).unwrap();

    workflow.on_cron(scheduled()).await.unwrap();

    // issue, comments and the 404 pull listing for each replica, then the reserve.
    assert_eq!(http.requests(), 3 * 3 + 3);
    assert_eq!(chain.writes().len(), 1);
}

#[tokio::test]
async fn message_handler_follows_the_primary_emitter() {
    let chain = stock_chain(500);
    let mut evm = sepolia_evm();
    evm["message_emitter_address"] = json!(format!("{:?}", address(0x40)));
    let workflow =
        ReserveWorkflow::new(context(&[chain], FakeHttp::new()), reserves_config(json!([evm]))).unwrap();

    let handler = workflow.message_handler().unwrap().expect("emitter is configured");

    assert_eq!(
        handler.trigger(),
        oracleflow::Trigger::ChainEvent {
            chain_selector_name: SEPOLIA.to_owned(),
            addresses: vec![address(0x40)],
            topic0: None,
        }
    );
}
