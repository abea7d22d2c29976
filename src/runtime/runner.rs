use crate::chain::ChainRegistry;
use crate::consensus::ReqwestFetcher;
use crate::report::{LocalKeySigner, ReportBuilder};
use crate::rpc::EvmRpcGateway;
use crate::runtime::config::OracleConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::trigger::log_poller::drive_logs;
use crate::trigger::schedule::{drive_schedule, parse_schedule};
use crate::trigger::{LogPoller, Trigger, TriggerDispatcher};
use crate::workflows::{
    CalculatorWorkflow, IssueTrackerWorkflow, ReserveWorkflow, WorkflowContext,
};
use anyhow::{ensure, Context, Result};
use cron::Schedule;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

enum Driver {
    Schedule(Schedule),
    Logs(LogPoller),
}

/// Owns the configured workflows and drives their triggers until shutdown.
pub struct Runner {
    dispatcher: Arc<TriggerDispatcher>,
    chains: ChainRegistry,
    log_poll_interval: Duration,
    metrics_interval: Duration,
    gateways: Vec<Arc<EvmRpcGateway>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("log_poll_interval", &self.log_poll_interval)
            .field("metrics_interval", &self.metrics_interval)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Connects every configured chain (checking its chain id), loads the
    /// development signer, and registers the configured workflows.
    pub async fn from_config(config: &OracleConfig) -> Result<Self> {
        let telemetry = Arc::new(Telemetry::default());

        let mut chains = ChainRegistry::new();
        let mut gateways = Vec::with_capacity(config.chains.len());
        for chain in &config.chains {
            let gateway = Arc::new(EvmRpcGateway::from_config(chain)?);
            gateway.verify_network().await.with_context(|| {
                format!("chain {} failed network verification", chain.chain_selector_name)
            })?;
            chains.insert(gateway.clone())?;
            gateways.push(gateway);
        }

        let http = Arc::new(ReqwestFetcher::new(
            config.consensus.http_timeout(),
            config.consensus.max_response_bytes,
        )?);
        let signer = Arc::new(LocalKeySigner::from_hex(&config.signer.private_key)?);
        tracing::info!(signer = ?signer.address(), "report signer loaded");
        let reports = Arc::new(match config.signer.config_digest {
            Some(digest) => ReportBuilder::with_config_digest(signer, digest),
            None => ReportBuilder::new(signer),
        });

        let ctx = WorkflowContext::new(chains, http, reports, config.consensus.replicas, telemetry);
        let mut runner = Self::with_context(config, ctx)?;
        runner.gateways = gateways;
        Ok(runner)
    }

    /// Registers the workflows of `config` against already built
    /// collaborators.
    pub fn with_context(config: &OracleConfig, ctx: WorkflowContext) -> Result<Self> {
        let mut dispatcher = TriggerDispatcher::new(ctx.telemetry.clone());

        if let Some(reserves) = &config.reserves {
            let workflow = ReserveWorkflow::new(ctx.clone(), reserves.clone())?;
            if let Some(handler) = workflow.message_handler()? {
                dispatcher.register(handler.trigger(), Arc::new(handler))?;
            }
            dispatcher.register(workflow.trigger(), Arc::new(workflow))?;
        }
        if let Some(tracker) = &config.issue_tracker {
            let workflow = IssueTrackerWorkflow::new(ctx.clone(), tracker.clone())?;
            dispatcher.register(workflow.trigger(), Arc::new(workflow))?;
        }
        if let Some(calculator) = &config.calculator {
            let workflow = CalculatorWorkflow::new(ctx.clone(), calculator.clone())?;
            dispatcher.register(workflow.trigger(), Arc::new(workflow))?;
        }
        ensure!(!dispatcher.is_empty(), "no workflow is configured");

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            chains: ctx.chains.clone(),
            log_poll_interval: config.log_poll_interval(),
            metrics_interval: config.metrics_interval(),
            gateways: Vec::new(),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            started: false,
        })
    }

    pub fn dispatcher(&self) -> Arc<TriggerDispatcher> {
        self.dispatcher.clone()
    }

    /// Returns a clone of the root shutdown token so callers can stop the
    /// runner from their own signal handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Spawns one driver per registered trigger plus the metrics reporter.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        // Build every driver before spawning any so a bad trigger leaves
        // nothing running.
        let mut drivers = Vec::with_capacity(self.dispatcher.len());
        for handle in self.dispatcher.handles() {
            let Some(trigger) = self.dispatcher.trigger(handle) else {
                continue;
            };
            let driver = match trigger {
                Trigger::Scheduled { schedule } => Driver::Schedule(parse_schedule(schedule)?),
                Trigger::ChainEvent { .. } => {
                    Driver::Logs(LogPoller::from_trigger(trigger, &self.chains)?)
                }
            };
            drivers.push((handle, driver));
        }

        let mut tasks = Vec::with_capacity(drivers.len() + 1);
        for (handle, driver) in drivers {
            let dispatcher = self.dispatcher.clone();
            let shutdown = self.shutdown.child_token();
            let task = match driver {
                Driver::Schedule(schedule) => {
                    tokio::spawn(drive_schedule(dispatcher, handle, schedule, shutdown))
                }
                Driver::Logs(poller) => {
                    let interval = self.log_poll_interval;
                    tokio::spawn(async move {
                        drive_logs(dispatcher, handle, poller, interval, shutdown).await;
                    })
                }
            };
            tracing::info!(%handle, "trigger driver started");
            tasks.push(task);
        }
        tasks.push(spawn_metrics_reporter(
            self.dispatcher.telemetry().clone(),
            self.gateways.clone(),
            self.shutdown.child_token(),
            self.metrics_interval,
        ));

        self.tasks = tasks;
        self.started = true;
        Ok(())
    }

    /// Cancels the root token and waits for every driver to finish its
    /// current delivery.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.join_tasks().await;
        self.started = false;
        self.shutdown = CancellationToken::new();
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!(
            workflows = self.dispatcher.len(),
            "runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown"
        );

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }

    async fn join_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "trigger driver ended abnormally");
            }
        }
    }
}
