//! Task handlers
//!
//! Each handler serves one [`Capability`]. Business logic stays
//! thin: handlers validate their payload, do their outbound calls through
//! [`Egress`], and return a JSON result or a [`HandlerError`]. The
//! dispatcher turns every error into a task failure report.

pub mod captcha;
pub mod form_fill;
pub mod generic;
pub mod scrape;

use async_trait::async_trait;
use coordination::{Capability, ConsensusResolver, Task};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::egress::{Egress, EgressError};

pub use captcha::CaptchaHandler;
pub use form_fill::FormFillHandler;
pub use generic::GenericHandler;
pub use scrape::ScrapeHandler;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Egress(#[from] EgressError),

    #[error("Upstream {url} returned status {status}")]
    Upstream { url: String, status: u16 },

    #[error("Consensus below threshold: {solution:?} at {confidence:.3} < {threshold:.3} ({agreement}/{valid} agreeing; votes: {votes})")]
    LowConfidence {
        solution: String,
        confidence: f64,
        threshold: f64,
        agreement: usize,
        valid: usize,
        /// One `agent=answer@confidence` or `agent!error` entry per vote
        votes: String,
    },

    #[error("No handler registered for capability {0}")]
    NoHandler(Capability),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// A handler for one task capability.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn capability(&self) -> Capability;

    async fn handle(&self, task: &Task, egress: &mut Egress) -> HandlerResult;
}

/// Decode a task payload into a handler-specific shape.
pub fn decode_payload<T: DeserializeOwned>(task: &Task) -> Result<T, HandlerError> {
    serde_json::from_value(task.payload.clone()).map_err(|e| {
        HandlerError::InvalidPayload(format!("{} task {}: {e}", task.task_type, task.id))
    })
}

/// Capability → handler lookup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Capability, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four built-in handlers; captcha tasks go to `resolver`.
    pub fn standard(resolver: Arc<ConsensusResolver>) -> Self {
        Self::new()
            .with(Arc::new(CaptchaHandler::new(resolver)))
            .with(Arc::new(ScrapeHandler))
            .with(Arc::new(FormFillHandler))
            .with(Arc::new(GenericHandler))
    }

    /// Register `handler`, replacing any handler for the same capability.
    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.capability(), handler);
        self
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&capability).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
