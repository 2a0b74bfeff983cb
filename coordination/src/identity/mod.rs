//! Egress identity management
//!
//! A worker routes every outbound handler call through one endpoint of its
//! [`IdentityPool`] and reports the outcome back, so endpoints that start
//! getting blocked are rotated away automatically.

pub mod pool;

pub use pool::{start_index, IdentityEndpoint, IdentityPool, RecordOutcome, BURN_THRESHOLD};
