use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use oracleflow::{OracleConfig, Runner};

const CONFIG_ENV: &str = "ORACLEFLOW_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "oracleflow.json";
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    init_demo_tracing();

    let path = config_path();
    let config = OracleConfig::load(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        chains = config.chains.len(),
        reserves = config.reserves.is_some(),
        issue_tracker = config.issue_tracker.is_some(),
        calculator = config.calculator.is_some(),
        "configuration loaded"
    );

    let mut runner = Runner::from_config(&config).await?;
    let dispatcher = runner.dispatcher();
    let result = runner.run_until_ctrl_c().await;

    let snapshot = dispatcher.telemetry().snapshot();
    println!(
        "runs: {} started, {} succeeded, {} failed; writes: {} submitted, {} failed",
        snapshot.runs_started,
        snapshot.runs_succeeded,
        snapshot.runs_failed,
        snapshot.writes_submitted,
        snapshot.writes_failed
    );
    result
}

/// First CLI argument, then `ORACLEFLOW_CONFIG`, then `./oracleflow.json`.
fn config_path() -> PathBuf {
    env::args_os()
        .nth(1)
        .or_else(|| env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn init_demo_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    oracleflow::init_tracing();
}
