//! Vote reduction for multi-agent consensus
//!
//! Valid votes (non-empty solution, confidence > 0) are grouped by exact
//! solution string. The largest group wins; on a size tie the group whose
//! solution appeared first in the vote list wins. Final confidence is the
//! winning group's mean confidence capped by its agreement ratio, so a few
//! confident agents cannot outvote a split field.

use serde::{Deserialize, Serialize};

/// Reason attached to the zero-vote sentinel.
pub const NO_VALID_VOTES: &str = "No valid votes received";

/// One agent's answer (or abstention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVote {
    pub agent_id: String,
    /// Empty means no answer.
    pub solution: String,
    /// In `[0, 1]`; 0 means abstention.
    pub confidence: f64,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConsensusVote {
    pub fn answer(
        agent_id: impl Into<String>,
        solution: impl Into<String>,
        confidence: f64,
        latency_ms: u64,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            agent_id: agent_id.into(),
            solution: solution.into(),
            confidence,
            latency_ms,
            error: None,
        }
    }

    /// Zero-confidence abstention carrying the failure reason.
    pub fn abstain(agent_id: impl Into<String>, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            solution: String::new(),
            confidence: 0.0,
            latency_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.confidence > 0.0 && !self.solution.is_empty()
    }
}

/// Reduced answer plus the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub solution: String,
    pub confidence: f64,
    pub agreement_count: usize,
    pub total_valid_votes: usize,
    pub meets_threshold: bool,
    pub votes: Vec<ConsensusVote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ConsensusResult {
    /// Sentinel for "nobody answered".
    pub fn no_votes(votes: Vec<ConsensusVote>) -> Self {
        Self {
            solution: String::new(),
            confidence: 0.0,
            agreement_count: 0,
            total_valid_votes: 0,
            meets_threshold: false,
            votes,
            reason: Some(NO_VALID_VOTES.to_string()),
        }
    }

    /// `agreement_count / total_valid_votes`, 0 when there are no votes.
    pub fn agreement_ratio(&self) -> f64 {
        if self.total_valid_votes == 0 {
            0.0
        } else {
            self.agreement_count as f64 / self.total_valid_votes as f64
        }
    }
}

/// Reduce a vote list to a single answer.
pub fn tally(votes: Vec<ConsensusVote>, threshold: f64) -> ConsensusResult {
    // Groups in first-appearance order: (solution, confidences)
    let mut groups: Vec<(&str, Vec<f64>)> = Vec::new();
    for vote in votes.iter().filter(|v| v.is_valid()) {
        match groups.iter_mut().find(|(s, _)| *s == vote.solution) {
            Some((_, confs)) => confs.push(vote.confidence),
            None => groups.push((vote.solution.as_str(), vec![vote.confidence])),
        }
    }

    let total_valid: usize = groups.iter().map(|(_, c)| c.len()).sum();

    let mut winner: Option<&(&str, Vec<f64>)> = None;
    for group in &groups {
        // Strict comparison keeps the earliest group on ties
        if winner.map_or(true, |w| group.1.len() > w.1.len()) {
            winner = Some(group);
        }
    }

    let Some((solution, confidences)) = winner else {
        return ConsensusResult::no_votes(votes);
    };

    let agreement = confidences.len();
    let avg_confidence = confidences.iter().sum::<f64>() / agreement as f64;
    let agreement_ratio = agreement as f64 / total_valid as f64;
    let confidence = avg_confidence.min(agreement_ratio);
    let solution = solution.to_string();

    ConsensusResult {
        solution,
        confidence,
        agreement_count: agreement,
        total_valid_votes: total_valid,
        meets_threshold: confidence >= threshold,
        votes,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_majority_discounted_by_agreement() {
        let votes = vec![
            ConsensusVote::answer("A", "ABC1", 0.90, 120),
            ConsensusVote::answer("B", "ABC1", 0.95, 140),
            ConsensusVote::answer("C", "XYZ2", 0.99, 90),
        ];
        let result = tally(votes, 0.9);

        assert_eq!(result.solution, "ABC1");
        assert_eq!(result.agreement_count, 2);
        assert_eq!(result.total_valid_votes, 3);
        assert!(approx(result.confidence, 0.667));
        assert!(!result.meets_threshold);
        assert_eq!(result.votes.len(), 3);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_all_abstentions_give_sentinel() {
        let votes = vec![
            ConsensusVote::abstain("A", "timeout", 5000),
            ConsensusVote::abstain("B", "timeout", 5000),
            ConsensusVote::abstain("C", "timeout", 5000),
        ];
        let result = tally(votes, 0.5);

        assert_eq!(result.solution, "");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.agreement_count, 0);
        assert_eq!(result.total_valid_votes, 0);
        assert!(!result.meets_threshold);
        assert_eq!(result.reason.as_deref(), Some(NO_VALID_VOTES));
        assert_eq!(result.votes.len(), 3);
    }

    #[test]
    fn test_single_vote() {
        let result = tally(vec![ConsensusVote::answer("A", "X9", 0.99, 50)], 0.9);
        assert_eq!(result.solution, "X9");
        assert_eq!(result.agreement_count, 1);
        assert_eq!(result.total_valid_votes, 1);
        assert!(approx(result.confidence, 0.99));
        assert!(result.meets_threshold);
    }

    #[test]
    fn test_tie_goes_to_first_appearance() {
        let votes = vec![
            ConsensusVote::answer("A", "BBB", 0.4, 10),
            ConsensusVote::answer("B", "AAA", 0.9, 10),
            ConsensusVote::answer("C", "AAA", 0.9, 10),
            ConsensusVote::answer("D", "BBB", 0.4, 10),
        ];
        let result = tally(votes, 0.0);
        assert_eq!(result.solution, "BBB");
        assert_eq!(result.agreement_count, 2);
        assert!(approx(result.confidence, 0.4));
    }

    #[test]
    fn test_empty_and_zero_confidence_votes_ignored() {
        let votes = vec![
            ConsensusVote::answer("A", "", 0.9, 10),
            ConsensusVote::answer("B", "Q1", 0.0, 10),
            ConsensusVote::answer("C", "Q2", 0.8, 10),
        ];
        let result = tally(votes, 0.5);
        assert_eq!(result.solution, "Q2");
        assert_eq!(result.total_valid_votes, 1);
        assert!(approx(result.confidence, 0.8));
    }

    #[test]
    fn test_solutions_compared_exactly() {
        let votes = vec![
            ConsensusVote::answer("A", "abc1", 0.9, 10),
            ConsensusVote::answer("B", "ABC1", 0.9, 10),
        ];
        let result = tally(votes, 0.0);
        assert_eq!(result.total_valid_votes, 2);
        assert_eq!(result.agreement_count, 1);
        assert_eq!(result.solution, "abc1");
        assert!(approx(result.confidence, 0.5));
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(ConsensusVote::answer("A", "x", 1.7, 0).confidence, 1.0);
        assert_eq!(ConsensusVote::answer("A", "x", f64::NAN, 0).confidence, 0.0);
        assert!(!ConsensusVote::answer("A", "x", -0.2, 0).is_valid());
    }
}
