//! HTTP solving agent
//!
//! Speaks the per-agent contract: `POST {base}/solve {"image": ...}` answered
//! by `{"solution": ..., "confidence": ..., "time": ...}`.

use async_trait::async_trait;
use std::time::Duration;

use super::resolver::{AgentAnswer, AgentError, SolveRequest, SolverAgent};

/// Agent reachable over HTTP.
pub struct HttpSolverAgent {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpSolverAgent {
    /// `timeout` bounds the transport; the resolver applies its own
    /// per-agent timeout on top.
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SolverAgent for HttpSolverAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn solve(&self, request: &SolveRequest) -> Result<AgentAnswer, AgentError> {
        let url = format!("{}/solve", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status { status, body });
        }

        response
            .json::<AgentAnswer>()
            .await
            .map_err(|e| AgentError::ParseError(e.to_string()))
    }
}
