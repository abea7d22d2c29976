use super::error::ConsensusError;
use super::spec::AggregationSpec;
use crate::runtime::panic::panic_message;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, ensure, Result};
use futures::future::join_all;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Runs a fetch function once per replica on its own task and reduces the
/// observations with an [`AggregationSpec`].
///
/// Aggregation waits for every replica. If any replica fails (error or
/// panic) the whole call fails and no partial record is produced.
#[derive(Debug, Clone)]
pub struct ReplicatedFetcher {
    replicas: usize,
    telemetry: Arc<Telemetry>,
}

impl ReplicatedFetcher {
    pub fn new(replicas: usize, telemetry: Arc<Telemetry>) -> Self {
        Self {
            replicas,
            telemetry,
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// `fetch` receives the replica index and must not touch shared mutable
    /// state: results are only combined once all replicas have returned.
    pub async fn fetch_agreed<T, F, Fut>(&self, fetch: F, spec: &AggregationSpec<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        ensure!(self.replicas > 0, "replica count must be greater than 0");

        let handles: Vec<_> = (0..self.replicas)
            .map(|replica| {
                let observation = fetch(replica);
                tokio::spawn(async move {
                    std::panic::AssertUnwindSafe(observation)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic_payload| {
                            Err(anyhow!(
                                "replica {replica} panicked: {}",
                                panic_message(panic_payload.as_ref())
                            ))
                        })
                })
            })
            .collect();

        let mut observations = Vec::with_capacity(self.replicas);
        let mut first_failure = None;
        for (replica, joined) in join_all(handles).await.into_iter().enumerate() {
            let outcome = joined
                .map_err(|err| anyhow!("replica {replica} task failed: {err}"))
                .and_then(|result| result);
            match outcome {
                Ok(observation) => observations.push(observation),
                Err(err) => {
                    self.telemetry.record_replica_failure();
                    tracing::warn!(replica, error = %format!("{err:#}"), "replica fetch failed");
                    if first_failure.is_none() {
                        first_failure = Some(ConsensusError::ReplicaFailed {
                            replica,
                            source: err,
                        });
                    }
                }
            }
        }

        if let Some(failure) = first_failure {
            return Err(failure.into());
        }

        match spec.aggregate(&observations) {
            Ok(agreed) => {
                tracing::debug!(replicas = self.replicas, "replicas reached agreement");
                Ok(agreed)
            }
            Err(err) => {
                if matches!(err, ConsensusError::Disagreement { .. }) {
                    self.telemetry.record_disagreement();
                }
                tracing::warn!(error = %err, "replica aggregation failed");
                Err(err.into())
            }
        }
    }
}

/// Free-standing form of [`ReplicatedFetcher::fetch_agreed`] for callers that
/// do not track telemetry.
pub async fn run_replicated<T, F, Fut>(
    fetch: F,
    spec: &AggregationSpec<T>,
    replica_count: usize,
) -> Result<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    ReplicatedFetcher::new(replica_count, Arc::new(Telemetry::default()))
        .fetch_agreed(fetch, spec)
        .await
}
