use super::error::{ErrorClass, WorkflowError};
use anyhow::{Error as AnyError, Result};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Stages of a single workflow run. `Succeeded` and `Failed` are terminal;
/// the next trigger starts a fresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Triggered,
    Fetching,
    Aggregating,
    ReadingChain,
    Deciding,
    Reporting,
    Writing,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Triggered => "triggered",
            RunState::Fetching => "fetching",
            RunState::Aggregating => "aggregating",
            RunState::ReadingChain => "reading chain",
            RunState::Deciding => "deciding",
            RunState::Reporting => "reporting",
            RunState::Writing => "writing",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Tracks and logs the stage of one run. Batch workflows track the run as a
/// whole and leave per-item failures to the batch summary.
#[derive(Debug)]
pub struct WorkflowRun {
    workflow: &'static str,
    run_id: u64,
    state: RunState,
    trail: Vec<RunState>,
    started: Instant,
}

impl WorkflowRun {
    /// Starts a run that has just been triggered.
    pub fn start(workflow: &'static str) -> Self {
        let mut run = Self {
            workflow,
            run_id: NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed),
            state: RunState::Idle,
            trail: Vec::new(),
            started: Instant::now(),
        };
        run.advance(RunState::Triggered);
        run
    }

    pub fn workflow(&self) -> &'static str {
        self.workflow
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered since the run was triggered, in order.
    pub fn trail(&self) -> &[RunState] {
        &self.trail
    }

    pub fn advance(&mut self, next: RunState) {
        if self.state.is_terminal() {
            tracing::warn!(
                workflow = self.workflow,
                run_id = self.run_id,
                from = %self.state,
                to = %next,
                "ignoring transition out of a terminal state"
            );
            return;
        }
        tracing::debug!(
            workflow = self.workflow,
            run_id = self.run_id,
            from = %self.state,
            to = %next,
            "run state changed"
        );
        self.state = next;
        self.trail.push(next);
    }

    /// Moves to `stage`, awaits `work`, and tags a failure with the stage and
    /// `class`.
    pub async fn stage<T, Fut>(&mut self, stage: RunState, class: ErrorClass, work: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.advance(stage);
        work.await.map_err(|err| self.fail(class, err))
    }

    /// Marks the run failed in its current stage and returns the tagged error.
    pub fn fail(&mut self, class: ErrorClass, source: AnyError) -> AnyError {
        let stage = self.state;
        tracing::error!(
            workflow = self.workflow,
            run_id = self.run_id,
            stage = %stage,
            class = %class,
            error = %format!("{source:#}"),
            "workflow run failed"
        );
        self.state = RunState::Failed;
        self.trail.push(RunState::Failed);
        WorkflowError::new(self.workflow, stage, class, source).into()
    }

    pub fn succeed(&mut self) {
        self.advance(RunState::Succeeded);
        tracing::debug!(
            workflow = self.workflow,
            run_id = self.run_id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            stages = ?self.trail,
            "workflow run completed"
        );
    }
}
