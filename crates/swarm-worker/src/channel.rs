//! Push notification channel
//!
//! A persistent WebSocket to the queue service. The server pushes
//! `task:created` and `worker:ping`; the worker pushes heartbeats back.
//!
//! Inbound frames are decoded and forwarded into the runtime's inbound
//! queue in arrival order; the runtime drains that queue from its own loop.
//! Disconnects are retried forever with a fixed delay.

use coordination::Task;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUTBOUND_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Malformed push message: {0}")]
    Decode(String),
}

/// Server → worker message
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// A new task was enqueued.
    TaskCreated(Task),
    /// Server asks for an immediate heartbeat.
    WorkerPing,
    /// Any other message type; ignored by the runtime.
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushMessage {
    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ChannelError::Decode(e.to_string()))?;
        match envelope.kind.as_str() {
            "task:created" => serde_json::from_value(envelope.data)
                .map(Self::TaskCreated)
                .map_err(|e| ChannelError::Decode(format!("task:created: {e}"))),
            "worker:ping" => Ok(Self::WorkerPing),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

/// Heartbeat frame sent over the channel.
pub fn heartbeat_frame(worker_id: &str) -> String {
    serde_json::json!({
        "type": "worker:heartbeat",
        "data": { "worker_id": worker_id },
    })
    .to_string()
}

/// Cloneable write side of the channel.
#[derive(Clone)]
pub struct ChannelSender {
    outbound: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

impl ChannelSender {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a heartbeat; `false` if the channel is down or backed up.
    pub fn send_heartbeat(&self, worker_id: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outbound.try_send(heartbeat_frame(worker_id)).is_ok()
    }
}

/// Handle to the background connection task.
pub struct PushChannel {
    sender: ChannelSender,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PushChannel {
    /// Spawn the connection task. Decoded messages go to `inbound`.
    pub fn open(
        url: &str,
        worker_id: &str,
        reconnect_delay: Duration,
        inbound: mpsc::Sender<PushMessage>,
    ) -> Self {
        let url = with_worker_id(url, worker_id);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_connection(
            url,
            reconnect_delay,
            inbound,
            outbound_rx,
            Arc::clone(&connected),
            cancel.clone(),
        ));

        Self {
            sender: ChannelSender {
                outbound: outbound_tx,
                connected,
            },
            cancel,
            handle,
        }
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Stop reconnecting, close the socket, and wait for the task to exit.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Push channel task ended abnormally");
        }
    }
}

/// Append `worker_id` as an encoded query parameter. A URL that does not
/// parse is returned as-is; connecting to it fails and is retried like any
/// other connection error.
fn with_worker_id(url: &str, worker_id: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair("worker_id", worker_id);
            parsed.to_string()
        }
        Err(e) => {
            warn!(url, error = %e, "Push URL does not parse");
            url.to_string()
        }
    }
}

async fn run_connection(
    url: String,
    reconnect_delay: Duration,
    inbound: mpsc::Sender<PushMessage>,
    mut outbound: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = connect_async(url.as_str()) => attempt,
        };

        match attempt {
            Ok((ws, _)) => {
                info!(url = %url, "Push channel connected");
                connected.store(true, Ordering::SeqCst);
                let (mut write, mut read) = ws.split();

                let reason = loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            connected.store(false, Ordering::SeqCst);
                            let _ = write.send(Message::Close(None)).await;
                            debug!("Push channel closed");
                            return;
                        }
                        frame = outbound.recv() => {
                            let Some(frame) = frame else {
                                break "outbound queue closed".to_string();
                            };
                            if let Err(e) = write.send(Message::Text(frame.into())).await {
                                break e.to_string();
                            }
                        }
                        msg = read.next() => {
                            let text = match msg {
                                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                                Some(Ok(Message::Binary(bytes))) => {
                                    match String::from_utf8(bytes.to_vec()) {
                                        Ok(text) => text,
                                        Err(_) => continue,
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    break "closed by server".to_string()
                                }
                                Some(Ok(_)) => continue,
                                Some(Err(e)) => break e.to_string(),
                            };
                            match PushMessage::decode(&text) {
                                Ok(message) => {
                                    if inbound.send(message).await.is_err() {
                                        connected.store(false, Ordering::SeqCst);
                                        debug!("Inbound queue dropped; closing push channel");
                                        return;
                                    }
                                }
                                Err(e) => warn!(error = %e, "Dropping push message"),
                            }
                        }
                    }
                };

                connected.store(false, Ordering::SeqCst);
                warn!(
                    reason = %reason,
                    delay_ms = reconnect_delay.as_millis() as u64,
                    "Push channel disconnected; reconnecting"
                );
            }
            Err(e) => {
                warn!(
                    error = %e,
                    delay_ms = reconnect_delay.as_millis() as u64,
                    "Push channel connect failed; retrying"
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    connected.store(false, Ordering::SeqCst);
}
