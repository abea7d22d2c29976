use super::run::RunState;
use anyhow::Error as AnyError;
use std::fmt;

/// Error taxonomy of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unknown chain selector or missing field. Never retried.
    Config,
    /// Invalid trigger delivery.
    Trigger,
    /// Non-2xx HTTP status or malformed body.
    Fetch,
    /// Replicas did not agree.
    Disagreement,
    /// RPC or decode failure while reading contract state.
    ChainRead,
    /// Agreed and on-chain inputs cannot be combined into a payload, such as
    /// a negative reserve or a sum past `uint256`.
    Decision,
    /// Report rejected or transaction not successful.
    ChainWrite,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Config => "configuration",
            ErrorClass::Trigger => "trigger",
            ErrorClass::Fetch => "fetch",
            ErrorClass::Disagreement => "disagreement",
            ErrorClass::ChainRead => "chain read",
            ErrorClass::Decision => "decision",
            ErrorClass::ChainWrite => "chain write",
        };
        f.write_str(label)
    }
}

/// Error that terminated a workflow run, tagged with the stage it happened in.
#[derive(Debug)]
pub struct WorkflowError {
    workflow: &'static str,
    stage: RunState,
    class: ErrorClass,
    source: AnyError,
}

impl WorkflowError {
    pub fn new(workflow: &'static str, stage: RunState, class: ErrorClass, source: AnyError) -> Self {
        Self {
            workflow,
            stage,
            class,
            source,
        }
    }

    /// A workflow that cannot be assembled from its configuration. Raised
    /// before any run starts, so the stage is always `Idle`.
    pub fn misconfigured(workflow: &'static str, source: AnyError) -> Self {
        Self::new(workflow, RunState::Idle, ErrorClass::Config, source)
    }

    pub fn workflow(&self) -> &'static str {
        self.workflow
    }

    pub fn stage(&self) -> RunState {
        self.stage
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} error while {}", self.workflow, self.class, self.stage)
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
