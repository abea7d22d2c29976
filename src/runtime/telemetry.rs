use crate::chain::ChainGateway;
use crate::rpc::EvmRpcGateway;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a fmt tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Process-wide workflow counters.
#[derive(Default, Debug)]
pub struct Telemetry {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    replica_failures: AtomicU64,
    disagreements: AtomicU64,
    chain_reads: AtomicU64,
    writes_submitted: AtomicU64,
    writes_failed: AtomicU64,
    batch_item_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_finished(&self, succeeded: bool) {
        if succeeded {
            self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_replica_failure(&self) {
        self.replica_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disagreement(&self) {
        self.disagreements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chain_read(&self) {
        self.chain_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, succeeded: bool) {
        self.writes_submitted.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.writes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_batch_item_errors(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.batch_item_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            replica_failures: self.replica_failures.load(Ordering::Relaxed),
            disagreements: self.disagreements.load(Ordering::Relaxed),
            chain_reads: self.chain_reads.load(Ordering::Relaxed),
            writes_submitted: self.writes_submitted.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            batch_item_errors: self.batch_item_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub replica_failures: u64,
    pub disagreements: u64,
    pub chain_reads: u64,
    pub writes_submitted: u64,
    pub writes_failed: u64,
    pub batch_item_errors: u64,
}

impl TelemetrySnapshot {
    fn runs_completed(&self) -> u64 {
        self.runs_succeeded + self.runs_failed
    }
}

/// Logs the workflow counters, then one line per node gateway, every
/// `interval` until `shutdown` fires.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    gateways: Vec<Arc<EvmRpcGateway>>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = telemetry.snapshot();

        while shutdown.run_until_cancelled(ticker.tick()).await.is_some() {
            let current = telemetry.snapshot();
            log_workflow_counters(&current, previous);
            for gateway in &gateways {
                log_gateway_counters(gateway);
            }
            previous = current;
        }
        tracing::info!(target: "oracleflow::metrics", "metrics reporter shutting down");
    })
}

fn log_workflow_counters(current: &TelemetrySnapshot, previous: TelemetrySnapshot) {
    tracing::info!(
        target: "oracleflow::metrics",
        completed_since_last = current.runs_completed().saturating_sub(previous.runs_completed()),
        runs_started = current.runs_started,
        runs_failed = current.runs_failed,
        replica_failures = current.replica_failures,
        disagreements = current.disagreements,
        chain_reads = current.chain_reads,
        writes_submitted = current.writes_submitted,
        writes_failed = current.writes_failed,
        batch_item_errors = current.batch_item_errors,
        "workflow counters"
    );
}

fn log_gateway_counters(gateway: &EvmRpcGateway) {
    let rpc = gateway.metrics();
    tracing::info!(
        target: "oracleflow::metrics",
        network = gateway.network().selector_name,
        requests = rpc.total_requests,
        errors = rpc.total_errors,
        timeouts = rpc.total_timeouts,
        node_rejections = rpc.node_rejections,
        avg_latency_ms = format_args!("{:.1}", rpc.average_latency_ms),
        reports_submitted = rpc.reports_submitted,
        reports_failed = rpc.reports_failed,
        breaker = ?rpc.breaker_state,
        "node gateway counters"
    );
}
