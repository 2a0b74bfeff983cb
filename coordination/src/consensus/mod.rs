//! Multi-agent consensus
//!
//! The [`ConsensusResolver`] sends one job to several independent
//! [`SolverAgent`]s in parallel and reduces their answers with
//! [`tally`]: majority by exact match, first-seen group wins ties,
//! confidence capped by the agreement ratio.
//!
//! The resolver only reports `meets_threshold`; accepting or rejecting the
//! answer is the caller's decision.

pub mod agent;
pub mod resolver;
pub mod voting;

pub use agent::HttpSolverAgent;
pub use resolver::{
    AgentAnswer, AgentError, ConsensusConfig, ConsensusResolver, SolveRequest, SolverAgent,
};
pub use voting::{tally, ConsensusResult, ConsensusVote, NO_VALID_VOTES};
