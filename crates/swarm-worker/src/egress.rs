//! Identity-wrapped outbound HTTP
//!
//! Every network call a handler makes goes through [`Egress::execute`],
//! which routes it via the pool's active endpoint and reports the outcome
//! back so burned identities rotate away.
//!
//! ```text
//! handler ──build──▶ Egress ──proxy(active)──▶ target
//!                      │
//!                      └─ record_result(active, ok?) ─▶ IdentityPool
//! ```

use coordination::{IdentityEndpoint, IdentityPool, RecordOutcome};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("Invalid proxy endpoint {address}: {reason}")]
    InvalidProxy { address: String, reason: String },

    #[error("Request via {via} failed: {reason}")]
    Request { via: String, reason: String },
}

/// Statuses that indicate the identity itself is being refused.
pub fn is_blocking_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN
            | StatusCode::PROXY_AUTHENTICATION_REQUIRED
            | StatusCode::TOO_MANY_REQUESTS
    )
}

/// Outbound HTTP bound to a worker's identity pool.
pub struct Egress {
    pool: IdentityPool,
    clients: HashMap<String, reqwest::Client>,
    direct: reqwest::Client,
    timeout: Duration,
}

impl Egress {
    pub fn new(pool: IdentityPool, timeout: Duration) -> Result<Self, EgressError> {
        let direct = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EgressError::InvalidProxy {
                address: "direct".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pool,
            clients: HashMap::new(),
            direct,
            timeout,
        })
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut IdentityPool {
        &mut self.pool
    }

    /// Address of the endpoint the next call will use.
    pub fn active_endpoint(&self) -> Option<&IdentityEndpoint> {
        self.pool.active()
    }

    /// Send a request built by `build` through the active identity.
    ///
    /// Transport errors and blocking statuses count against the identity;
    /// any other response counts as a success. The response is returned
    /// as-is, including blocking statuses.
    pub async fn execute<F>(&mut self, build: F) -> Result<reqwest::Response, EgressError>
    where
        F: FnOnce(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let Some(address) = self.pool.active().map(|e| e.address.clone()) else {
            return build(&self.direct)
                .send()
                .await
                .map_err(|e| EgressError::Request {
                    via: "direct".to_string(),
                    reason: e.to_string(),
                });
        };

        let client = match self.client_for(&address) {
            Ok(client) => client,
            Err(e) => {
                self.record(&address, false);
                return Err(e);
            }
        };

        self.pool.mark_used();
        match build(&client).send().await {
            Ok(response) => {
                let ok = !is_blocking_status(response.status());
                if !ok {
                    debug!(
                        endpoint = %address,
                        status = %response.status(),
                        "Identity refused by target"
                    );
                }
                self.record(&address, ok);
                Ok(response)
            }
            Err(e) => {
                self.record(&address, false);
                Err(EgressError::Request {
                    via: address,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn record(&mut self, address: &str, success: bool) {
        if let RecordOutcome::Rotated { burned, active } = self.pool.record_result(address, success)
        {
            debug!(burned = %burned, active = %active, "Egress now routed through new identity");
        }
    }

    fn client_for(&mut self, address: &str) -> Result<reqwest::Client, EgressError> {
        if let Some(client) = self.clients.get(address) {
            return Ok(client.clone());
        }
        let invalid = |reason: String| EgressError::InvalidProxy {
            address: address.to_string(),
            reason,
        };
        let proxy = reqwest::Proxy::all(address).map_err(|e| invalid(e.to_string()))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        self.clients.insert(address.to_string(), client.clone());
        Ok(client)
    }
}
