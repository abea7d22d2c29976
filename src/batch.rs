//! Per-item pipelines over independent work items with failure isolation.
//!
//! Every item runs to completion or failure on its own. A failed (or
//! panicking) item is logged and recorded in the [`BatchSummary`]; the rest of
//! the batch keeps going. Items are processed in input order, optionally with
//! bounded concurrency.

use crate::runtime::panic::panic_message;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Error, Result};
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a successful item pipeline did.
#[derive(Debug)]
pub enum ItemOutcome {
    /// The item caused a state-changing action (e.g. a new registration).
    Changed,
    /// The item was inspected and nothing needed to change.
    Unchanged,
    /// The item expanded into a nested batch whose counts and errors are
    /// merged into the parent summary.
    Nested(BatchSummary),
}

#[derive(Debug)]
pub struct ItemError {
    pub item: String,
    pub error: Error,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.item, self.error)
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Items whose pipeline succeeded.
    pub inspected: usize,
    /// Items whose pipeline performed a state-changing action.
    pub processed_count: usize,
    pub errors: Vec<ItemError>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn absorb(&mut self, parent: &str, nested: BatchSummary) {
        self.inspected += nested.inspected;
        self.processed_count += nested.processed_count;
        self.errors
            .extend(nested.errors.into_iter().map(|item_error| ItemError {
                item: format!("{parent} / {}", item_error.item),
                error: item_error.error,
            }));
    }
}

#[derive(Debug, Clone)]
pub struct BatchProcessor {
    name: &'static str,
    concurrency: usize,
    telemetry: Option<Arc<Telemetry>>,
}

impl BatchProcessor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            concurrency: 1,
            telemetry: None,
        }
    }

    /// Runs up to `concurrency` item pipelines at once. Each item still
    /// issues its own chain writes; nothing is shared between pipelines.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub async fn for_each<I, F, Fut>(&self, items: Vec<I>, pipeline: F) -> BatchSummary
    where
        I: fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<ItemOutcome>>,
    {
        let total = items.len();
        let outcomes: Vec<(String, Result<ItemOutcome>)> = futures::stream::iter(items)
            .map(|item| {
                let label = item.to_string();
                let run = std::panic::AssertUnwindSafe(pipeline(item)).catch_unwind();
                async move {
                    let outcome = run.await.unwrap_or_else(|panic_payload| {
                        Err(anyhow!(
                            "item pipeline panicked: {}",
                            panic_message(panic_payload.as_ref())
                        ))
                    });
                    (label, outcome)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        let mut direct_errors = 0u64;
        for (item, outcome) in outcomes {
            match outcome {
                Ok(ItemOutcome::Changed) => {
                    summary.inspected += 1;
                    summary.processed_count += 1;
                }
                Ok(ItemOutcome::Unchanged) => summary.inspected += 1,
                Ok(ItemOutcome::Nested(nested)) => summary.absorb(&item, nested),
                Err(error) => {
                    tracing::warn!(
                        batch = self.name,
                        item = %item,
                        error = %format!("{error:#}"),
                        "batch item failed; continuing"
                    );
                    direct_errors += 1;
                    summary.errors.push(ItemError { item, error });
                }
            }
        }

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_batch_item_errors(direct_errors);
        }
        tracing::debug!(
            batch = self.name,
            total,
            inspected = summary.inspected,
            processed = summary.processed_count,
            failed = summary.failed(),
            "batch finished"
        );
        summary
    }
}
