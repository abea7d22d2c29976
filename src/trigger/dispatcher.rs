use super::{Trigger, TriggerError, TriggerPayload};
use crate::runtime::error::WorkflowError;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Workflow entry point invoked once per trigger delivery.
pub trait TriggerHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the workflow for one payload and returns a short summary.
    fn handle(&self, payload: TriggerPayload) -> BoxFuture<'_, Result<String>>;
}

/// Identifies one registration in a [`TriggerDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowHandle(usize);

impl fmt::Display for WorkflowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workflow #{}", self.0)
    }
}

struct Registration {
    trigger: Trigger,
    handler: Arc<dyn TriggerHandler>,
}

/// Binds triggers to handlers. Delivery is at-least-once from the drivers'
/// point of view and the dispatcher never retries a failed run.
pub struct TriggerDispatcher {
    registrations: Vec<Registration>,
    telemetry: Arc<Telemetry>,
}

impl TriggerDispatcher {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            registrations: Vec::new(),
            telemetry,
        }
    }

    pub fn register(
        &mut self,
        trigger: Trigger,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<WorkflowHandle> {
        trigger.validate()?;
        let handle = WorkflowHandle(self.registrations.len());
        tracing::info!(
            %handle,
            workflow = handler.name(),
            trigger = trigger.kind(),
            "workflow registered"
        );
        self.registrations.push(Registration { trigger, handler });
        Ok(handle)
    }

    pub fn trigger(&self, handle: WorkflowHandle) -> Option<&Trigger> {
        self.registrations
            .get(handle.0)
            .map(|registration| &registration.trigger)
    }

    pub fn handles(&self) -> impl Iterator<Item = WorkflowHandle> + '_ {
        (0..self.registrations.len()).map(WorkflowHandle)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Invokes the handler registered as `handle` with `payload`.
    pub async fn dispatch(&self, handle: WorkflowHandle, payload: TriggerPayload) -> Result<String> {
        let registration = self
            .registrations
            .get(handle.0)
            .ok_or(TriggerError::UnknownHandle(handle))?;
        if registration.trigger.kind() != payload.kind() {
            return Err(TriggerError::PayloadMismatch {
                expected: registration.trigger.kind(),
                actual: payload.kind(),
            }
            .into());
        }

        let workflow = registration.handler.name();
        self.telemetry.record_run_started();
        let started = Instant::now();
        let outcome = registration.handler.handle(payload).await;
        self.telemetry.record_run_finished(outcome.is_ok());

        match &outcome {
            Ok(summary) => tracing::info!(
                workflow,
                %handle,
                elapsed_ms = started.elapsed().as_millis() as u64,
                summary = %summary,
                "workflow run succeeded"
            ),
            // The run already logged its own failure with stage and class.
            Err(err) if err.is::<WorkflowError>() => tracing::debug!(
                workflow,
                %handle,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "workflow run failed"
            ),
            Err(err) => tracing::error!(
                workflow,
                %handle,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %format!("{err:#}"),
                "workflow run failed"
            ),
        }
        outcome
    }
}

impl fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|registration| (registration.handler.name(), &registration.trigger)),
            )
            .finish()
    }
}
