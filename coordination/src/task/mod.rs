//! Task and worker data model
//!
//! These types mirror the queue service's JSON contract. The queue owns the
//! authoritative copies; a worker only ever holds a transient copy of the
//! task it has claimed.

pub mod types;

pub use types::{Task, TaskId, TaskStatus, Worker, WorkerId, WorkerRegistration, WorkerStatus};
