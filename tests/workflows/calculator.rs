use crate::support::fakes::{address, context, FakeChain, FakeHttp, SEPOLIA};
use chrono::{TimeZone, Utc};
use oracleflow::abi::{decode, ParamType, Token, U256};
use oracleflow::runtime::config::CalculatorConfig;
use oracleflow::workflows::contracts;
use oracleflow::{BlockRef, CalculatorWorkflow, CronPayload, ErrorClass, RunState, WorkflowError};
use serde_json::json;
use std::sync::Arc;

const API_URL: &str = "https://random.test/integers?num=1&min=1&max=100&col=1&base=10&format=plain";

fn calculator(chain: &Arc<FakeChain>, http: Arc<FakeHttp>) -> CalculatorWorkflow {
    let config: CalculatorConfig = serde_json::from_value(json!({
        "schedule": "*/30 * * * * *",
        "api_url": API_URL,
        "evm": {
            "chain_selector_name": SEPOLIA,
            "storage_address": format!("{:?}", address(0x60)),
            "calculator_consumer_address": format!("{:?}", address(0x61)),
            "gas_limit": 300000
        }
    }))
    .unwrap();
    CalculatorWorkflow::new(context(&[chain.clone()], http), config).unwrap()
}

fn scheduled() -> CronPayload {
    CronPayload::at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap())
}

#[tokio::test]
async fn sum_of_median_offchain_value_and_storage_is_reported() {
    let chain = FakeChain::new(SEPOLIA);
    chain.respond(address(0x60), &contracts::storage_get(), &[Token::Uint(U256::from(22u64))]);
    let http = FakeHttp::new();
    http.queue(API_URL, &[(200, "17\n"), (200, "20\n"), (200, "18\n")]);

    let result = calculator(&chain, http).on_cron(scheduled()).await.unwrap();

    assert_eq!(result.offchain_value, U256::from(18u64));
    assert_eq!(result.onchain_value, U256::from(22u64));
    assert_eq!(result.final_result, U256::from(40u64));
    assert_eq!(chain.read_blocks(), vec![BlockRef::Finalized]);

    let writes = chain.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].receiver, address(0x61));
    assert_eq!(writes[0].gas_limit, 300_000);
    let decoded = decode(
        &[ParamType::Uint(256), ParamType::Int(256), ParamType::Uint(256)],
        &writes[0].raw_report,
    )
    .unwrap();
    assert_eq!(
        decoded,
        vec![
            Token::Uint(U256::from(18u64)),
            Token::Int(U256::from(22u64)),
            Token::Uint(U256::from(40u64)),
        ]
    );
}

#[tokio::test]
async fn malformed_offchain_value_is_a_fetch_error() {
    let chain = FakeChain::new(SEPOLIA);
    let http = FakeHttp::new();
    http.route(API_URL, 200, "not a number");

    let err = calculator(&chain, http).on_cron(scheduled()).await.unwrap_err();

    assert_eq!(err.downcast_ref::<WorkflowError>().unwrap().class(), ErrorClass::Fetch);
    assert_eq!(chain.interactions(), 0);
}

#[tokio::test]
async fn missing_scheduled_time_skips_the_fetch() {
    let chain = FakeChain::new(SEPOLIA);
    let http = FakeHttp::new();
    http.route(API_URL, 200, "5");

    let err = calculator(&chain, http.clone())
        .on_cron(CronPayload::default())
        .await
        .unwrap_err();

    assert_eq!(err.downcast_ref::<WorkflowError>().unwrap().class(), ErrorClass::Trigger);
    assert_eq!(http.requests(), 0);
}

#[tokio::test]
async fn storage_read_failure_is_a_chain_read_error() {
    let chain = FakeChain::new(SEPOLIA);
    let http = FakeHttp::new();
    http.route(API_URL, 200, "5");

    let err = calculator(&chain, http).on_cron(scheduled()).await.unwrap_err();

    assert_eq!(err.downcast_ref::<WorkflowError>().unwrap().class(), ErrorClass::ChainRead);
    assert!(chain.writes().is_empty());
}

#[tokio::test]
async fn overflowing_sum_is_a_decision_error() {
    let chain = FakeChain::new(SEPOLIA);
    chain.respond(address(0x60), &contracts::storage_get(), &[Token::Uint(U256::MAX)]);
    let http = FakeHttp::new();
    http.route(API_URL, 200, "5");

    let err = calculator(&chain, http).on_cron(scheduled()).await.unwrap_err();

    let workflow_error = err.downcast_ref::<WorkflowError>().unwrap();
    assert_eq!(workflow_error.class(), ErrorClass::Decision);
    assert_eq!(workflow_error.stage(), RunState::Deciding);
    assert_eq!(chain.read_blocks(), vec![BlockRef::Finalized]);
    assert!(chain.writes().is_empty());
}
