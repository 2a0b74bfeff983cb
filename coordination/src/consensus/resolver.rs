//! Concurrent fan-out to solving agents
//!
//! Every agent gets the same request at the same time. Each call is boxed by
//! its own timeout; failures and timeouts become abstentions instead of
//! aborting the round, and the resolver always returns a result.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::voting::{tally, ConsensusResult, ConsensusVote};

/// Errors from a single agent call
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent request failed: {0}")]
    RequestFailed(String),

    #[error("Agent returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),
}

/// Job sent to every agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Encoded image (base64 or URL, opaque to the resolver)
    pub image: String,
}

/// Answer as reported by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAnswer {
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub confidence: f64,
    /// Agent-reported solve time. Informational only; agents disagree on
    /// units, so it may be fractional.
    #[serde(default)]
    pub time: Option<f64>,
}

/// An independent solving agent
#[async_trait]
pub trait SolverAgent: Send + Sync {
    fn id(&self) -> &str;

    async fn solve(&self, request: &SolveRequest) -> Result<AgentAnswer, AgentError>;
}

/// Resolver settings
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub agent_timeout: Duration,
    /// Minimum final confidence for `meets_threshold`
    pub confidence_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(30),
            confidence_threshold: 0.8,
        }
    }
}

/// Fans a job out to N agents and reduces their answers.
pub struct ConsensusResolver {
    agents: Vec<Arc<dyn SolverAgent>>,
    config: ConsensusConfig,
}

impl ConsensusResolver {
    pub fn new(agents: Vec<Arc<dyn SolverAgent>>, config: ConsensusConfig) -> Self {
        Self { agents, config }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn threshold(&self) -> f64 {
        self.config.confidence_threshold
    }

    /// Query every agent concurrently and tally the votes.
    ///
    /// Wall time is bounded by the agent timeout, not by the number of agents.
    pub async fn resolve(&self, request: &SolveRequest) -> ConsensusResult {
        info!(agents = self.agents.len(), "Starting consensus round");

        let calls = self
            .agents
            .iter()
            .map(|agent| query_agent(agent.as_ref(), request, self.config.agent_timeout));
        let votes = join_all(calls).await;

        let result = tally(votes, self.config.confidence_threshold);
        if result.total_valid_votes == 0 {
            warn!(agents = self.agents.len(), "Consensus round produced no valid votes");
        } else {
            info!(
                solution = %result.solution,
                confidence = result.confidence,
                agreement = result.agreement_count,
                valid = result.total_valid_votes,
                meets_threshold = result.meets_threshold,
                "Consensus reached"
            );
        }
        result
    }
}

async fn query_agent(
    agent: &dyn SolverAgent,
    request: &SolveRequest,
    timeout: Duration,
) -> ConsensusVote {
    let start = Instant::now();
    let outcome = match tokio::time::timeout(timeout, agent.solve(request)).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout(timeout)),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(answer) => {
            debug!(
                agent = agent.id(),
                solution = %answer.solution,
                confidence = answer.confidence,
                latency_ms,
                "Agent answered"
            );
            ConsensusVote::answer(agent.id(), answer.solution, answer.confidence, latency_ms)
        }
        Err(e) => {
            warn!(agent = agent.id(), error = %e, latency_ms, "Agent abstained");
            ConsensusVote::abstain(agent.id(), e.to_string(), latency_ms)
        }
    }
}
