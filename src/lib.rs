pub mod abi;
pub mod batch;
pub mod chain;
pub mod consensus;
pub mod report;
pub mod rpc;
pub mod runtime;
pub mod trigger;
pub mod workflows;

pub use batch::{BatchProcessor, BatchSummary, ItemError, ItemOutcome};
pub use chain::{
    BlockRef, ChainGateway, ChainReadResult, ChainRegistry, EvmLog, GasConfig, TxOutcome, TxStatus,
};
pub use consensus::{
    run_replicated, AggregationSpec, ConsensusError, FieldReducer, HttpFetcher, ReplicatedFetcher,
};
pub use report::{LocalKeySigner, Report, ReportBuilder, ReportRequest, ReportSigner};
pub use rpc::circuit_breaker::{
    BreakerSettings, CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker,
};
pub use rpc::{EvmRpcGateway, RpcError};
pub use runtime::config::OracleConfig;
pub use runtime::error::{ErrorClass, WorkflowError};
pub use runtime::run::{RunState, WorkflowRun};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use trigger::{
    CronPayload, Trigger, TriggerDispatcher, TriggerError, TriggerHandler, TriggerPayload,
    WorkflowHandle,
};
pub use workflows::{
    CalculatorWorkflow, IssueTrackerWorkflow, MessageLogHandler, ReserveWorkflow, WorkflowContext,
};
