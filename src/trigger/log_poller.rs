use super::{Trigger, TriggerDispatcher, TriggerPayload, WorkflowHandle};
use crate::abi::{Address, H256};
use crate::chain::{ChainGateway, ChainRegistry, EvmLog, LogFilter};
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_BLOCK_RANGE: u64 = 1_000;

/// Reads logs from finalized blocks only, so a delivered log can never be
/// reorganized away. Fetched logs wait in a queue until they are marked
/// delivered; no new range is fetched while any are still queued.
pub struct LogPoller {
    gateway: Arc<dyn ChainGateway>,
    addresses: Vec<Address>,
    topic0: Option<H256>,
    next_block: Option<u64>,
    max_block_range: u64,
    pending: VecDeque<EvmLog>,
}

impl LogPoller {
    pub fn new(gateway: Arc<dyn ChainGateway>, addresses: Vec<Address>, topic0: Option<H256>) -> Self {
        Self {
            gateway,
            addresses,
            topic0,
            next_block: None,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            pending: VecDeque::new(),
        }
    }

    pub fn from_trigger(trigger: &Trigger, chains: &ChainRegistry) -> Result<Self> {
        match trigger {
            Trigger::ChainEvent {
                chain_selector_name,
                addresses,
                topic0,
            } => Ok(Self::new(
                chains.resolve(chain_selector_name)?,
                addresses.clone(),
                *topic0,
            )),
            Trigger::Scheduled { .. } => bail!("scheduled triggers are not driven by a log poller"),
        }
    }

    /// Starts delivery at `block` instead of after the current finalized head.
    pub fn starting_at(mut self, block: u64) -> Self {
        self.next_block = Some(block);
        self
    }

    pub fn with_max_block_range(mut self, blocks: u64) -> Self {
        self.max_block_range = blocks.max(1);
        self
    }

    /// Next block a range query starts at.
    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Oldest fetched log that has not been delivered yet.
    pub fn peek_pending(&self) -> Option<&EvmLog> {
        self.pending.front()
    }

    /// Drops the log returned by [`LogPoller::peek_pending`] after it was
    /// handed to its handler.
    pub fn mark_delivered(&mut self) -> Option<EvmLog> {
        self.pending.pop_front()
    }

    /// Fetches and hands over the logs of the next finalized block range,
    /// ordered by block and log index. The first poll only positions the
    /// cursor.
    pub async fn poll_once(&mut self) -> Result<Vec<EvmLog>> {
        self.fetch_pending().await?;
        Ok(self.pending.drain(..).collect())
    }

    /// Queues the logs of the next finalized block range and returns the
    /// queue length. Does nothing while earlier logs are still queued.
    pub async fn fetch_pending(&mut self) -> Result<usize> {
        if !self.pending.is_empty() {
            return Ok(self.pending.len());
        }
        let finalized = self.gateway.finalized_block_number().await?;
        let Some(from_block) = self.next_block else {
            self.next_block = Some(finalized + 1);
            tracing::debug!(
                network = self.gateway.network().selector_name,
                finalized,
                "log poller positioned after finalized head"
            );
            return Ok(0);
        };
        if from_block > finalized {
            return Ok(0);
        }

        let to_block = finalized.min(from_block + self.max_block_range - 1);
        let filter = LogFilter {
            addresses: self.addresses.clone(),
            topic0: self.topic0,
            from_block,
            to_block,
        };
        let mut logs = self.gateway.get_logs(&filter).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        self.next_block = Some(to_block + 1);

        tracing::trace!(from_block, to_block, logs = logs.len(), "polled logs");
        self.pending.extend(logs);
        Ok(self.pending.len())
    }
}

/// Polls every `interval` and dispatches each new log once. A log leaves the
/// queue only after its dispatch returned, so logs not yet handed over when
/// shutdown is requested stay queued in the returned poller.
pub async fn drive_logs(
    dispatcher: Arc<TriggerDispatcher>,
    handle: WorkflowHandle,
    mut poller: LogPoller,
    interval: Duration,
    shutdown: CancellationToken,
) -> LogPoller {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while shutdown.run_until_cancelled(ticker.tick()).await.is_some() {
        if let Err(err) = poller.fetch_pending().await {
            tracing::warn!(%handle, error = %format!("{err:#}"), "log poll failed");
            continue;
        }
        while let Some(log) = poller.peek_pending().cloned() {
            if shutdown.is_cancelled() {
                break;
            }
            let _ = dispatcher.dispatch(handle, TriggerPayload::Log(log)).await;
            poller.mark_delivered();
        }
    }

    tracing::debug!(%handle, undelivered = poller.pending_len(), "log poller shutting down");
    poller
}
