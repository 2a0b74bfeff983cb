//! Heartbeat emission and connection-health tracking
//!
//! Heartbeats run on their own task with their own interval so a long
//! handler never starves them. A `worker:ping` from the server triggers an
//! immediate beat through [`Liveness::ping`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ChannelSender;
use crate::queue::QueueApi;

/// Health counters published after every beat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivenessSnapshot {
    /// Beats acknowledged by the queue service
    pub beats_sent: u64,
    pub beats_failed: u64,
    pub consecutive_failures: u32,
    /// Beats also delivered over the push channel
    pub channel_beats: u64,
    pub last_success: Option<DateTime<Utc>>,
}

impl LivenessSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// Cloneable trigger for out-of-schedule beats.
#[derive(Clone)]
pub struct Pinger(pub(crate) Arc<Notify>);

impl Pinger {
    pub fn ping(&self) {
        self.0.notify_one();
    }
}

/// Handle to the heartbeat task.
pub struct Liveness {
    ping: Arc<Notify>,
    cancel: CancellationToken,
    snapshot: watch::Receiver<LivenessSnapshot>,
    handle: JoinHandle<()>,
}

impl Liveness {
    /// Start beating every `interval`. The first beat goes out immediately.
    pub fn spawn(
        worker_id: String,
        queue: Arc<dyn QueueApi>,
        channel: Option<ChannelSender>,
        interval: Duration,
    ) -> Self {
        let ping = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(LivenessSnapshot::default());

        let handle = tokio::spawn(heartbeat_loop(
            worker_id,
            queue,
            channel,
            interval,
            Arc::clone(&ping),
            cancel.clone(),
            tx,
        ));

        Self {
            ping,
            cancel,
            snapshot: rx,
            handle,
        }
    }

    /// Request an out-of-schedule heartbeat.
    pub fn ping(&self) {
        self.ping.notify_one();
    }

    pub fn pinger(&self) -> Pinger {
        Pinger(Arc::clone(&self.ping))
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LivenessSnapshot> {
        self.snapshot.clone()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }
    }
}

async fn heartbeat_loop(
    worker_id: String,
    queue: Arc<dyn QueueApi>,
    channel: Option<ChannelSender>,
    interval: Duration,
    ping: Arc<Notify>,
    cancel: CancellationToken,
    snapshot: watch::Sender<LivenessSnapshot>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = ping.notified() => debug!(worker_id = %worker_id, "Heartbeat requested by server"),
        }
        beat(&worker_id, queue.as_ref(), channel.as_ref(), &snapshot).await;
    }
}

async fn beat(
    worker_id: &str,
    queue: &dyn QueueApi,
    channel: Option<&ChannelSender>,
    snapshot: &watch::Sender<LivenessSnapshot>,
) {
    let over_channel = channel.is_some_and(|c| c.send_heartbeat(worker_id));
    if channel.is_some() && !over_channel {
        debug!(worker_id, "Push channel down; heartbeat sent over HTTP only");
    }

    let result = queue.heartbeat(worker_id).await;
    snapshot.send_modify(|s| {
        if over_channel {
            s.channel_beats += 1;
        }
        match &result {
            Ok(()) => {
                s.beats_sent += 1;
                s.consecutive_failures = 0;
                s.last_success = Some(Utc::now());
            }
            Err(_) => {
                s.beats_failed += 1;
                s.consecutive_failures += 1;
            }
        }
    });

    match result {
        Ok(()) => debug!(worker_id, "Heartbeat sent"),
        Err(e) => warn!(
            worker_id,
            error = %e,
            streak = snapshot.borrow().consecutive_failures,
            "Heartbeat failed; retrying next tick"
        ),
    }
}
