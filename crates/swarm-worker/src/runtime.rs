//! Worker runtime
//!
//! Owns the worker lifecycle: register once, then run the heartbeat task,
//! the optional push channel, and a single dispatch loop until stopped.
//!
//! ```text
//!            ┌──────────── dispatch loop (one logical sequence) ────────────┐
//! cancel ───▶│ select! { cancelled | inbound message | poll tick }          │
//! channel ──▶│   ping        → liveness beat                                │
//!            │   task:created → offer ─┐                                    │
//! ticker ───▶│   tick         → poll ──┴▶ claim → handler (awaited inline)  │
//!            └──────────────────────────────────────────────────────────────┘
//! ```

use coordination::{IdentityPool, WorkerId, WorkerStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{PushChannel, PushMessage};
use crate::config::{ConfigError, WorkerConfig};
use crate::dispatcher::{DispatchOutcome, DispatchStats, Dispatcher};
use crate::egress::{Egress, EgressError};
use crate::handlers::HandlerRegistry;
use crate::liveness::{Liveness, LivenessSnapshot, Pinger};
use crate::queue::{QueueApi, QueueError};

const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Worker registration failed: {0}")]
    Registration(#[source] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Egress(#[from] EgressError),
}

/// A configured, not-yet-registered worker.
pub struct WorkerRuntime {
    config: WorkerConfig,
    queue: Arc<dyn QueueApi>,
    handlers: HandlerRegistry,
}

impl WorkerRuntime {
    pub fn new(config: WorkerConfig, queue: Arc<dyn QueueApi>, handlers: HandlerRegistry) -> Self {
        Self {
            config,
            queue,
            handlers,
        }
    }

    /// Register with the queue service and start all background activity.
    ///
    /// Registration failure is fatal; nothing is spawned in that case.
    pub async fn start(self) -> Result<WorkerHandle, RuntimeError> {
        let config = self.config;
        config.validate()?;
        let capabilities = config.capability_set().map_err(ConfigError::from)?;
        let table = config.capability_table().map_err(ConfigError::from)?;
        let registration = config.registration().map_err(ConfigError::from)?;

        let worker_id = self
            .queue
            .register(&registration)
            .await
            .map_err(RuntimeError::Registration)?;
        info!(
            worker_id = %worker_id,
            name = %registration.name,
            capabilities = ?registration.capabilities,
            "Worker registered"
        );

        let pool = IdentityPool::for_worker(&config.proxies, &worker_id);
        let egress = Egress::new(pool, config.request_timeout())?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let channel = config.push_url.as_deref().map(|url| {
            PushChannel::open(url, &worker_id, config.reconnect_delay(), inbound_tx.clone())
        });
        drop(inbound_tx);
        if channel.is_none() {
            info!(worker_id = %worker_id, "No push channel configured; polling only");
        }

        let liveness = Liveness::spawn(
            worker_id.clone(),
            Arc::clone(&self.queue),
            channel.as_ref().map(PushChannel::sender),
            config.heartbeat_interval(),
        );

        let dispatcher = Dispatcher::new(
            worker_id.clone(),
            Arc::clone(&self.queue),
            capabilities,
            table,
            self.handlers,
            egress,
        );

        let cancel = CancellationToken::new();
        let dispatch = tokio::spawn(dispatch_loop(
            dispatcher,
            config.poll_interval(),
            Some(inbound_rx),
            liveness.pinger(),
            cancel.clone(),
        ));

        Ok(WorkerHandle {
            worker_id,
            queue: self.queue,
            cancel,
            dispatch,
            liveness,
            channel,
        })
    }
}

/// A running worker.
pub struct WorkerHandle {
    worker_id: WorkerId,
    queue: Arc<dyn QueueApi>,
    cancel: CancellationToken,
    dispatch: JoinHandle<DispatchStats>,
    liveness: Liveness,
    channel: Option<PushChannel>,
}

impl WorkerHandle {
    /// Identifier assigned by the queue service at registration.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn liveness(&self) -> LivenessSnapshot {
        self.liveness.snapshot()
    }

    pub fn is_channel_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(PushChannel::is_connected)
    }

    /// Graceful shutdown.
    ///
    /// Heartbeats and the push channel stop right away. An in-flight
    /// handler still runs to completion and reports before the worker is
    /// marked offline (best effort).
    pub async fn stop(self) -> DispatchStats {
        info!(worker_id = %self.worker_id, "Worker stopping");
        self.cancel.cancel();
        self.liveness.stop().await;
        if let Some(channel) = self.channel {
            channel.close().await;
        }

        let stats = match self.dispatch.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(worker_id = %self.worker_id, error = %e, "Dispatch loop ended abnormally");
                DispatchStats::default()
            }
        };

        if let Err(e) = self
            .queue
            .update_status(&self.worker_id, WorkerStatus::Offline)
            .await
        {
            warn!(worker_id = %self.worker_id, error = %e, "Failed to report offline status");
        }

        info!(
            worker_id = %self.worker_id,
            completed = stats.completed,
            failed = stats.failed,
            "Worker stopped"
        );
        stats
    }
}

async fn dispatch_loop(
    mut dispatcher: Dispatcher,
    poll_interval: Duration,
    mut inbound: Option<mpsc::Receiver<PushMessage>>,
    pinger: Pinger,
    cancel: CancellationToken,
) -> DispatchStats {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = next_message(&mut inbound) => match message {
                Some(PushMessage::WorkerPing) => pinger.ping(),
                Some(PushMessage::TaskCreated(task)) => {
                    debug!(task_id = %task.id, "Task pushed");
                    let outcome = dispatcher.offer(task).await;
                    log_outcome(dispatcher.worker_id(), &outcome);
                }
                Some(PushMessage::Unknown(kind)) => debug!(kind = %kind, "Ignoring push message"),
                None => inbound = None,
            },
            _ = ticker.tick() => {
                let outcome = dispatcher.poll_once().await;
                log_outcome(dispatcher.worker_id(), &outcome);
            }
        }
    }

    dispatcher.stats().clone()
}

/// Next inbound message; pends forever once the queue is gone.
async fn next_message(inbound: &mut Option<mpsc::Receiver<PushMessage>>) -> Option<PushMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn log_outcome(worker_id: &str, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Idle | DispatchOutcome::Busy => {}
        DispatchOutcome::Unreachable { error } => {
            debug!(worker_id, error = %error, "Queue unreachable this tick")
        }
        other => debug!(worker_id, outcome = ?other, "Dispatch attempt finished"),
    }
}
