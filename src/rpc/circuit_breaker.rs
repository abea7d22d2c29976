use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_HALF_OPEN_LIMIT: usize = 1;

/// Coarse breaker state exposed to metrics and call logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

/// Per-chain `circuit_breaker` section. Every field is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    pub failure_threshold: usize,
    pub cooldown_secs: u64,
    pub half_open_limit: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            half_open_limit: DEFAULT_HALF_OPEN_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerError {
    CircuitOpen,
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "node circuit breaker is open"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    Trial { since: Instant, in_flight: usize },
}

impl Phase {
    fn public(&self) -> CircuitState {
        match self {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::Trial { .. } => CircuitState::HalfOpen,
        }
    }

    fn opened_at(&self) -> Option<Instant> {
        match self {
            Phase::Closed => None,
            Phase::Open { since } | Phase::Trial { since, .. } => Some(*since),
        }
    }
}

#[derive(Debug)]
struct Gate {
    phase: Phase,
    failure_streak: usize,
}

/// Fail-fast gate in front of one node endpoint. It never retries a call: once
/// `failure_threshold` transport failures happen in a row every call is refused
/// until the cooldown passes, then `half_open_limit` calls are let through to
/// decide whether the endpoint is back.
#[derive(Debug, Clone)]
pub struct RpcCircuitBreaker {
    gate: Arc<Mutex<Gate>>,
    endpoint: Arc<str>,
    failure_threshold: usize,
    cooldown: Duration,
    half_open_limit: usize,
}

impl Default for RpcCircuitBreaker {
    fn default() -> Self {
        Self::from_settings("node", BreakerSettings::default())
    }
}

impl RpcCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration, half_open_limit: usize) -> Self {
        Self {
            gate: Arc::new(Mutex::new(Gate {
                phase: Phase::Closed,
                failure_streak: 0,
            })),
            endpoint: Arc::from("node"),
            failure_threshold: failure_threshold.max(1),
            cooldown: cooldown.max(Duration::from_millis(1)),
            half_open_limit: half_open_limit.max(1),
        }
    }

    /// Breaker for a named endpoint, used as the `endpoint` field of every
    /// state change it logs.
    pub fn from_settings(endpoint: impl Into<String>, settings: BreakerSettings) -> Self {
        let mut breaker = Self::new(
            settings.failure_threshold,
            Duration::from_secs(settings.cooldown_secs),
            settings.half_open_limit,
        );
        breaker.endpoint = Arc::from(endpoint.into());
        breaker
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let gate = self.lock();
        CircuitBreakerSnapshot {
            state: gate.phase.public(),
            consecutive_failures: gate.failure_streak,
            opened_at: gate.phase.opened_at(),
        }
    }

    /// Admits or refuses the next call. Admission while half-open takes one of
    /// the trial slots; the first recorded outcome settles the trial.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut gate = self.lock();
        let phase = gate.phase;
        match phase {
            Phase::Closed => Ok(CircuitState::Closed),
            Phase::Open { since } if since.elapsed() < self.cooldown => {
                Err(CircuitBreakerError::CircuitOpen)
            }
            Phase::Open { since } => {
                self.enter(&mut gate, Phase::Trial { since, in_flight: 1 });
                Ok(CircuitState::HalfOpen)
            }
            Phase::Trial { in_flight, .. } if in_flight >= self.half_open_limit => {
                Err(CircuitBreakerError::CircuitOpen)
            }
            Phase::Trial { since, in_flight } => {
                gate.phase = Phase::Trial {
                    since,
                    in_flight: in_flight + 1,
                };
                Ok(CircuitState::HalfOpen)
            }
        }
    }

    /// The endpoint answered. Node-side rejections (reverts, invalid params)
    /// count as answers too.
    pub fn record_success(&self) {
        let mut gate = self.lock();
        gate.failure_streak = 0;
        if !matches!(gate.phase, Phase::Closed) {
            self.enter(&mut gate, Phase::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut gate = self.lock();
        gate.failure_streak = gate.failure_streak.saturating_add(1);
        let trips = match gate.phase {
            Phase::Closed => gate.failure_streak >= self.failure_threshold,
            Phase::Trial { .. } => true,
            Phase::Open { .. } => false,
        };
        if trips {
            self.enter(
                &mut gate,
                Phase::Open {
                    since: Instant::now(),
                },
            );
        }
    }

    fn enter(&self, gate: &mut Gate, next: Phase) {
        let previous = gate.phase.public();
        gate.phase = next;
        if previous != next.public() {
            tracing::warn!(
                endpoint = %self.endpoint,
                ?previous,
                next = ?next.public(),
                failure_streak = gate.failure_streak,
                "node circuit breaker state changed"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
