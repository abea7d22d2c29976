use super::{CronPayload, TriggerDispatcher, TriggerPayload, WorkflowHandle};
use anyhow::{anyhow, Result};
use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Parses a six-field cron expression (`sec min hour day month weekday`).
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression.trim())
        .map_err(|err| anyhow!("invalid cron schedule {expression:?}: {err}"))
}

/// Sleeps until each fire time of `schedule` and dispatches a payload
/// carrying that time. Fire times that pass while a run is still in
/// progress are skipped.
pub async fn drive_schedule(
    dispatcher: Arc<TriggerDispatcher>,
    handle: WorkflowHandle,
    schedule: Schedule,
    shutdown: CancellationToken,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::info!(%handle, "schedule has no further fire times");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(%handle, "schedule driver shutting down");
                break;
            }
            _ = sleep(wait) => {}
        }

        tracing::debug!(%handle, scheduled_at = %next, "schedule fired");
        // Failures are logged and counted by the dispatcher; the next fire
        // time starts a fresh run.
        let _ = dispatcher
            .dispatch(handle, TriggerPayload::Cron(CronPayload::at(next)))
            .await;
    }
}
