//! Swarm worker runtime
//!
//! A long-lived worker that registers with a shared task queue, keeps
//! itself alive with heartbeats, and pulls or receives tasks it is capable
//! of handling. Outbound handler traffic is routed through a rotating pool
//! of egress identities.
//!
//! - [`runtime`]: lifecycle (register, run, stop)
//! - [`dispatcher`]: capability filter, optimistic claim, execution
//! - [`liveness`]: periodic and on-demand heartbeats
//! - [`channel`]: push notifications over WebSocket
//! - [`egress`]: identity-wrapped outbound HTTP
//! - [`handlers`]: per-capability task handlers
//! - [`queue`]: queue service client

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod egress;
pub mod handlers;
pub mod liveness;
pub mod queue;
pub mod runtime;

pub use config::WorkerConfig;
pub use dispatcher::{DispatchOutcome, DispatchStats, Dispatcher};
pub use runtime::{RuntimeError, WorkerHandle, WorkerRuntime};
