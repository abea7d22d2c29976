use crate::support::fakes::{address, context, FakeChain, FakeHttp, SEPOLIA};
use crate::support::init_tracing;
use oracleflow::abi::{Token, U256};
use oracleflow::workflows::contracts;
use oracleflow::{OracleConfig, Runner, Trigger};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const SIGNER_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const API_URL: &str = "https://random.test/value";

fn base_config(workflows: Value) -> OracleConfig {
    let mut document = json!({
        "chains": [{
            "chain_selector_name": SEPOLIA,
            "rpc_url": "http://127.0.0.1:8545",
            "sender_address": format!("{:?}", address(0x01)),
        }],
        "signer": {"private_key": SIGNER_KEY},
        "log_poll_interval_secs": 1,
        "metrics_interval_secs": 60,
    });
    if let (Some(document), Some(workflows)) = (document.as_object_mut(), workflows.as_object()) {
        document.extend(workflows.clone());
    }
    OracleConfig::from_json(&document.to_string()).unwrap()
}

fn calculator_section(schedule: &str) -> Value {
    json!({
        "calculator": {
            "schedule": schedule,
            "api_url": API_URL,
            "evm": {
                "chain_selector_name": SEPOLIA,
                "storage_address": format!("{:?}", address(0x60)),
                "calculator_consumer_address": format!("{:?}", address(0x61)),
            }
        }
    })
}

fn reserves_section() -> Value {
    json!({
        "reserves": {
            "schedule": "0 0 0 1 1 *",
            "url": "https://por.test/reserves",
            "evms": [{
                "chain_selector_name": SEPOLIA,
                "token_address": format!("{:?}", address(0x10)),
                "proxy_address": format!("{:?}", address(0x20)),
                "balance_reader_address": format!("{:?}", address(0x30)),
                "message_emitter_address": format!("{:?}", address(0x40)),
            }]
        }
    })
}

#[test]
fn config_without_workflows_is_rejected_by_the_runner() {
    let config = base_config(json!({}));
    let chain = FakeChain::new(SEPOLIA);

    let err = Runner::with_context(&config, context(&[chain], FakeHttp::new())).unwrap_err();

    assert_eq!(err.to_string(), "no workflow is configured");
}

#[test]
fn reserves_with_an_emitter_register_a_log_trigger_first() {
    let config = base_config(reserves_section());
    let chain = FakeChain::new(SEPOLIA);

    let runner = Runner::with_context(&config, context(&[chain], FakeHttp::new())).unwrap();
    let dispatcher = runner.dispatcher();
    let triggers: Vec<&Trigger> = dispatcher
        .handles()
        .filter_map(|handle| dispatcher.trigger(handle))
        .collect();

    assert_eq!(triggers.len(), 2);
    assert!(matches!(triggers[0], Trigger::ChainEvent { addresses, .. } if addresses == &vec![address(0x40)]));
    assert_eq!(triggers[1], &Trigger::scheduled("0 0 0 1 1 *"));
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    init_tracing();
    let mut document = reserves_section();
    document
        .as_object_mut()
        .unwrap()
        .extend(calculator_section("0 0 0 1 1 *").as_object().unwrap().clone());
    let config = base_config(document);
    let chain = FakeChain::new(SEPOLIA);
    let mut runner = Runner::with_context(&config, context(&[chain], FakeHttp::new())).unwrap();

    runner.start().await.unwrap();
    runner.start().await.unwrap();
    assert!(runner.is_running());

    timeout(Duration::from_secs(5), runner.stop()).await.unwrap().unwrap();
    assert!(!runner.is_running());
    runner.stop().await.unwrap();
}

#[tokio::test]
async fn scheduled_workflow_runs_until_cancelled() {
    init_tracing();
    let config = base_config(calculator_section("* * * * * *"));
    let chain = FakeChain::new(SEPOLIA);
    chain.respond(address(0x60), &contracts::storage_get(), &[Token::Uint(U256::from(1u64))]);
    let http = FakeHttp::new();
    http.route(API_URL, 200, "41");
    let mut runner = Runner::with_context(&config, context(&[chain.clone()], http)).unwrap();
    let token = runner.cancellation_token();

    runner.start().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while chain.writes().is_empty() && Instant::now() < deadline {
        sleep(Duration::from_millis(50)).await;
    }
    token.cancel();
    timeout(Duration::from_secs(5), runner.stop()).await.unwrap().unwrap();

    let writes = chain.writes();
    assert!(!writes.is_empty(), "the schedule never fired");
    assert_eq!(writes[0].receiver, address(0x61));
    let telemetry = runner.dispatcher().telemetry().snapshot();
    assert!(telemetry.runs_succeeded >= 1);
}
