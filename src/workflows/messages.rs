use super::contracts;
use super::WorkflowContext;
use crate::abi::{Address, Token};
use crate::chain::{ChainGateway, EvmLog};
use crate::runtime::error::ErrorClass;
use crate::runtime::run::{RunState, WorkflowRun};
use crate::trigger::{
    require_topics, topic_address, Trigger, TriggerError, TriggerHandler, TriggerPayload,
    MIN_EVENT_TOPICS,
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

pub const WORKFLOW: &str = "message-log";

/// Answers message emitter events with the emitter's last stored message.
/// The emitter is the address in the event's first indexed topic.
pub struct MessageLogHandler {
    ctx: WorkflowContext,
    chain_selector_name: String,
    gateway: Arc<dyn ChainGateway>,
    message_emitter: Address,
}

impl MessageLogHandler {
    pub fn new(ctx: WorkflowContext, chain_selector_name: &str, message_emitter: Address) -> Result<Self> {
        let gateway = ctx.chain(WORKFLOW, chain_selector_name)?;
        Ok(Self {
            ctx,
            chain_selector_name: chain_selector_name.to_owned(),
            gateway,
            message_emitter,
        })
    }

    pub fn trigger(&self) -> Trigger {
        Trigger::ChainEvent {
            chain_selector_name: self.chain_selector_name.clone(),
            addresses: vec![self.message_emitter],
            topic0: None,
        }
    }

    pub async fn on_log(&self, log: &EvmLog) -> Result<String> {
        let mut run = WorkflowRun::start(WORKFLOW);
        self.execute(&mut run, log).await
    }

    async fn execute(&self, run: &mut WorkflowRun, log: &EvmLog) -> Result<String> {
        require_topics(log, MIN_EVENT_TOPICS).map_err(|err| {
            tracing::warn!(topics = log.topics.len(), "log payload does not contain enough topics");
            run.fail(ErrorClass::Trigger, err.into())
        })?;
        let emitter = topic_address(&log.topics[1]);
        tracing::info!(
            workflow = WORKFLOW,
            run_id = run.run_id(),
            emitter = ?emitter,
            block = log.block_number,
            "message event received"
        );

        let function = contracts::get_last_message();
        let args = [Token::Address(emitter)];
        let message = run
            .stage(RunState::ReadingChain, ErrorClass::ChainRead, async {
                self.ctx
                    .read(self.gateway.as_ref(), self.message_emitter, &function, &args)
                    .await?
                    .string(0)
            })
            .await?;
        tracing::info!(workflow = WORKFLOW, message = %message, "message retrieved from the contract");
        run.succeed();
        Ok(message)
    }
}

impl TriggerHandler for MessageLogHandler {
    fn name(&self) -> &'static str {
        WORKFLOW
    }

    fn handle(&self, payload: TriggerPayload) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut run = WorkflowRun::start(WORKFLOW);
            match payload {
                TriggerPayload::Log(log) => self.execute(&mut run, &log).await,
                other => Err(run.fail(
                    ErrorClass::Trigger,
                    TriggerError::PayloadMismatch {
                        expected: "log",
                        actual: other.kind(),
                    }
                    .into(),
                )),
            }
        })
    }
}
