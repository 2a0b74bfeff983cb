//! Egress identity pool with burn-driven rotation.
//!
//! The pool tracks consecutive failures per endpoint, much like a circuit
//! breaker. Once the *active* endpoint accumulates [`BURN_THRESHOLD`]
//! consecutive failures it is considered burned: the pool rotates to the
//! next endpoint and clears the burned endpoint's streak so it starts fresh
//! if the rotation ever comes back around.
//!
//! Each worker starts at `blake3(worker_id) mod pool_size`, which keeps a
//! restarted worker on the same endpoint and spreads distinct workers over
//! the pool without any coordination between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Consecutive failures on the active endpoint before it is rotated away.
pub const BURN_THRESHOLD: u32 = 3;

/// One egress endpoint and its counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEndpoint {
    /// Proxy address, e.g. `http://10.0.0.5:3128` or `socks5://host:1080`
    pub address: String,
    pub success_count: u64,
    /// Failure streak while active. Reset by a success and whenever the
    /// endpoint enters or leaves the active slot.
    pub fail_count: u32,
    /// Lifetime failures, never reset.
    pub total_failures: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl IdentityEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            success_count: 0,
            fail_count: 0,
            total_failures: 0,
            last_used_at: None,
        }
    }
}

/// What happened as a result of [`IdentityPool::record_result`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Counters updated, active endpoint unchanged.
    Recorded,
    /// The active endpoint burned and the pool moved on.
    Rotated { burned: String, active: String },
    /// Address is not part of this pool.
    UnknownEndpoint,
}

/// Fixed set of egress endpoints owned by a single worker.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    endpoints: Vec<IdentityEndpoint>,
    index: usize,
}

impl IdentityPool {
    /// Pool starting at index 0.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<IdentityEndpoint> =
            addresses.into_iter().map(IdentityEndpoint::new).collect();
        if endpoints.is_empty() {
            warn!("Identity pool is empty; operating unprotected (direct egress)");
        }
        Self {
            endpoints,
            index: 0,
        }
    }

    /// Pool positioned at this worker's deterministic starting index.
    pub fn for_worker<I, S>(addresses: I, worker_id: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::new(addresses);
        pool.index = start_index(worker_id, pool.endpoints.len());
        if let Some(active) = pool.endpoints.get(pool.index) {
            info!(
                worker_id,
                index = pool.index,
                endpoint = %active.address,
                pool_size = pool.endpoints.len(),
                "Identity pool ready"
            );
        }
        pool
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Index of the active endpoint.
    pub fn active_index(&self) -> usize {
        self.index
    }

    /// Currently active endpoint, `None` when the pool is empty.
    pub fn active(&self) -> Option<&IdentityEndpoint> {
        self.endpoints.get(self.index)
    }

    /// Advance to the next endpoint (wrapping) and return it.
    pub fn rotate(&mut self) -> Option<&IdentityEndpoint> {
        if self.endpoints.is_empty() {
            return None;
        }
        let previous = self.index;
        self.index = (self.index + 1) % self.endpoints.len();
        self.endpoints[self.index].fail_count = 0;
        info!(
            from = %self.endpoints[previous].address,
            to = %self.endpoints[self.index].address,
            "Rotated egress identity"
        );
        self.endpoints.get(self.index)
    }

    /// Stamp the active endpoint as used now.
    pub fn mark_used(&mut self) {
        if let Some(ep) = self.endpoints.get_mut(self.index) {
            ep.last_used_at = Some(Utc::now());
        }
    }

    /// Record the outcome of a call made through `address`.
    ///
    /// Only failures on the active endpoint extend its streak, so only they
    /// can trigger a rotation. Late results for an inactive endpoint update
    /// the lifetime counters alone.
    pub fn record_result(&mut self, address: &str, success: bool) -> RecordOutcome {
        let Some(pos) = self.endpoints.iter().position(|e| e.address == address) else {
            warn!(endpoint = address, "Result recorded for endpoint outside the pool");
            return RecordOutcome::UnknownEndpoint;
        };

        let active = pos == self.index;
        let ep = &mut self.endpoints[pos];
        if success {
            ep.success_count += 1;
            ep.fail_count = 0;
            return RecordOutcome::Recorded;
        }

        ep.total_failures += 1;
        if !active {
            debug!(endpoint = address, "Failure recorded for inactive endpoint");
            return RecordOutcome::Recorded;
        }

        ep.fail_count += 1;
        debug!(endpoint = address, streak = ep.fail_count, "Egress failure recorded");
        if ep.fail_count < BURN_THRESHOLD {
            return RecordOutcome::Recorded;
        }

        warn!(
            endpoint = address,
            streak = ep.fail_count,
            "Egress identity burned"
        );
        ep.fail_count = 0;
        let burned = ep.address.clone();
        match self.rotate() {
            Some(next) => RecordOutcome::Rotated {
                burned,
                active: next.address.clone(),
            },
            None => RecordOutcome::Recorded,
        }
    }

    /// Copy of every endpoint's counters.
    pub fn snapshot(&self) -> Vec<IdentityEndpoint> {
        self.endpoints.clone()
    }
}

/// `blake3(worker_id) mod pool_size`; 0 for an empty pool.
pub fn start_index(worker_id: &str, pool_size: usize) -> usize {
    if pool_size == 0 {
        return 0;
    }
    let digest = blake3::hash(worker_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(head) % pool_size as u64) as usize
}
