//! Ethereum JSON-RPC plumbing behind the chain gateway: endpoint headers,
//! circuit breaker, call instrumentation, metrics, network table and the
//! `EvmRpcGateway` itself.

pub mod auth;
pub mod call;
pub mod circuit_breaker;
pub mod client;
pub mod helpers;
pub mod metrics;
pub mod network;
pub mod options;

pub use circuit_breaker::{
    BreakerSettings, CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker,
};
pub use client::{EvmRpcGateway, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use network::{resolve_network, EvmNetwork, KNOWN_NETWORKS};
pub use options::EvmGatewayOptions;
