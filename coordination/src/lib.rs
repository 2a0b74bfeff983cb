//! Swarm coordination core
//!
//! This library provides the deterministic pieces shared by every
//! automation worker:
//! - Task and worker data model mirroring the queue service contract
//! - Capability matching (closed capability set, wildcard, type table)
//! - Egress identity pool with burn-driven rotation
//! - Multi-agent consensus with majority vote and confidence weighting
//!
//! Networking is limited to the HTTP solving agent; everything else is
//! plain state owned by the caller.

#![allow(clippy::uninlined_format_args)]

pub mod capability;
pub mod consensus;
pub mod identity;
pub mod task;

// Re-export key capability types
pub use capability::{Capability, CapabilityError, CapabilitySet, CapabilityTable};

// Re-export key consensus types
pub use consensus::{
    tally, AgentAnswer, AgentError, ConsensusConfig, ConsensusResolver, ConsensusResult,
    ConsensusVote, HttpSolverAgent, SolveRequest, SolverAgent,
};

// Re-export key identity types
pub use identity::{IdentityEndpoint, IdentityPool, RecordOutcome, BURN_THRESHOLD};

// Re-export key task types
pub use task::{Task, TaskId, TaskStatus, Worker, WorkerId, WorkerRegistration, WorkerStatus};
