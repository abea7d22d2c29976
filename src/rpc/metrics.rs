//! Counters for the JSON-RPC traffic of one gateway.

use crate::rpc::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How a single round trip to the node ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOutcome {
    Answered,
    /// The node answered with a JSON-RPC error (revert, bad params).
    Rejected,
    TimedOut,
    Failed,
}

#[derive(Debug, Default)]
pub(crate) struct RpcMetrics {
    calls: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    latency_ns: AtomicU64,
    reports_landed: AtomicU64,
    reports_failed: AtomicU64,
}

impl RpcMetrics {
    pub(crate) fn record_call(&self, outcome: CallOutcome, latency: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_ns.fetch_add(nanos, Ordering::Relaxed);
        let bucket = match outcome {
            CallOutcome::Answered => return,
            CallOutcome::Rejected => &self.rejected,
            CallOutcome::TimedOut => &self.timed_out,
            CallOutcome::Failed => &self.failed,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_report(&self, landed: bool) {
        let counter = if landed {
            &self.reports_landed
        } else {
            &self.reports_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> RpcMetricsSnapshot {
        let total_requests = self.calls.load(Ordering::Relaxed);
        let timed_out = self.timed_out.load(Ordering::Relaxed);
        // Rejections are answers from a healthy node, not transport errors.
        let total_errors = timed_out + self.failed.load(Ordering::Relaxed);
        let reports_failed = self.reports_failed.load(Ordering::Relaxed);
        let per_call = |value: u64| {
            if total_requests == 0 {
                0.0
            } else {
                value as f64 / total_requests as f64
            }
        };

        RpcMetricsSnapshot {
            total_requests,
            total_errors,
            node_rejections: self.rejected.load(Ordering::Relaxed),
            average_latency_ms: per_call(self.latency_ns.load(Ordering::Relaxed)) / 1_000_000.0,
            error_rate: per_call(total_errors),
            total_timeouts: timed_out,
            reports_submitted: self.reports_landed.load(Ordering::Relaxed) + reports_failed,
            reports_failed,
            breaker_state,
        }
    }
}

/// Point-in-time view of a gateway's traffic, logged by the runner.
#[derive(Debug, Copy, Clone)]
pub struct RpcMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub node_rejections: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub total_timeouts: u64,
    pub reports_submitted: u64,
    pub reports_failed: u64,
    pub breaker_state: CircuitState,
}
