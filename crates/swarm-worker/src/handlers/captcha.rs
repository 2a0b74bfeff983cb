//! Captcha handler backed by multi-agent consensus

use async_trait::async_trait;
use coordination::{Capability, ConsensusResolver, ConsensusVote, SolveRequest, Task};
use std::sync::Arc;
use tracing::info;

use super::{decode_payload, HandlerError, HandlerResult, TaskHandler};
use crate::egress::Egress;

/// Resolves a captcha by polling every configured solver agent.
///
/// The answer is accepted only when the consensus meets the resolver's
/// confidence threshold. Solver agents are the worker's own backends, so
/// their calls go out directly and never touch the identity pool.
pub struct CaptchaHandler {
    resolver: Arc<ConsensusResolver>,
}

impl CaptchaHandler {
    pub fn new(resolver: Arc<ConsensusResolver>) -> Self {
        Self { resolver }
    }
}

fn audit_trail(votes: &[ConsensusVote]) -> String {
    votes
        .iter()
        .map(|v| match &v.error {
            Some(e) => format!("{}!{e}", v.agent_id),
            None => format!("{}={}@{:.2}", v.agent_id, v.solution, v.confidence),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl TaskHandler for CaptchaHandler {
    fn capability(&self) -> Capability {
        Capability::CaptchaSolve
    }

    async fn handle(&self, task: &Task, _egress: &mut Egress) -> HandlerResult {
        let request: SolveRequest = decode_payload(task)?;
        let result = self.resolver.resolve(&request).await;

        if !result.meets_threshold {
            return Err(HandlerError::LowConfidence {
                solution: result.solution,
                confidence: result.confidence,
                threshold: self.resolver.threshold(),
                agreement: result.agreement_count,
                valid: result.total_valid_votes,
                votes: audit_trail(&result.votes),
            });
        }

        info!(
            task_id = %task.id,
            confidence = result.confidence,
            agreement = result.agreement_count,
            "Captcha solved"
        );
        Ok(serde_json::json!({
            "solution": result.solution,
            "confidence": result.confidence,
            "agreement": result.agreement_count,
            "total_votes": result.total_valid_votes,
            "votes": result.votes,
        }))
    }
}
