//! Triggers and the dispatcher that binds them to workflow handlers.
//!
//! A trigger is created from configuration at registration time and never
//! changes afterwards. Drivers in [`schedule`] and [`log_poller`] turn
//! triggers into payloads and hand them to [`TriggerDispatcher::dispatch`].

pub mod dispatcher;
pub mod log_poller;
pub mod schedule;

pub use dispatcher::{TriggerDispatcher, TriggerHandler, WorkflowHandle};
pub use log_poller::LogPoller;

use crate::abi::{Address, H256};
use crate::chain::EvmLog;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::fmt;

/// Topic count a chain event must carry: the event selector plus two
/// indexed fields.
pub const MIN_EVENT_TOPICS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Six-field cron expression, seconds first.
    Scheduled { schedule: String },
    /// Logs emitted by `addresses` on the named chain, optionally filtered
    /// by the event selector.
    ChainEvent {
        chain_selector_name: String,
        addresses: Vec<Address>,
        topic0: Option<H256>,
    },
}

impl Trigger {
    pub fn scheduled(schedule: impl Into<String>) -> Self {
        Trigger::Scheduled {
            schedule: schedule.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Scheduled { .. } => "cron",
            Trigger::ChainEvent { .. } => "log",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::Scheduled { schedule: expression } => {
                schedule::parse_schedule(expression)?;
            }
            Trigger::ChainEvent {
                chain_selector_name,
                addresses,
                ..
            } => {
                if chain_selector_name.trim().is_empty() {
                    bail!("chain event trigger needs a chain selector name");
                }
                if addresses.is_empty() {
                    bail!("chain event trigger needs at least one contract address");
                }
            }
        }
        Ok(())
    }
}

/// Payload of a scheduled trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CronPayload {
    pub scheduled_execution_time: Option<DateTime<Utc>>,
}

impl CronPayload {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            scheduled_execution_time: Some(time),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPayload {
    Cron(CronPayload),
    Log(EvmLog),
}

impl TriggerPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerPayload::Cron(_) => "cron",
            TriggerPayload::Log(_) => "log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    MissingScheduledTime,
    NotEnoughTopics {
        expected: usize,
        actual: usize,
    },
    PayloadMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    UnknownHandle(WorkflowHandle),
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerError::MissingScheduledTime => write!(f, "scheduled execution time is required"),
            TriggerError::NotEnoughTopics { expected, actual } => write!(
                f,
                "log payload does not contain enough topics: expected at least {expected}, got {actual}"
            ),
            TriggerError::PayloadMismatch { expected, actual } => {
                write!(f, "expected a {expected} payload, got a {actual} payload")
            }
            TriggerError::UnknownHandle(handle) => write!(f, "no workflow registered as {handle}"),
        }
    }
}

impl std::error::Error for TriggerError {}

/// Rejects scheduled deliveries that do not say when they were meant to run.
pub fn require_scheduled_time(payload: &CronPayload) -> Result<DateTime<Utc>, TriggerError> {
    payload
        .scheduled_execution_time
        .ok_or(TriggerError::MissingScheduledTime)
}

pub fn require_topics(log: &EvmLog, expected: usize) -> Result<(), TriggerError> {
    if log.topics.len() < expected {
        return Err(TriggerError::NotEnoughTopics {
            expected,
            actual: log.topics.len(),
        });
    }
    Ok(())
}

/// Address held in the low 20 bytes of an indexed topic.
pub fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}
