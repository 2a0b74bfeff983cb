//! Queue service client
//!
//! The queue/broker is an external service. The runtime talks to it only
//! through [`QueueApi`], so tests can substitute an in-memory queue.
//!
//! | Call            | HTTP                                   |
//! |-----------------|----------------------------------------|
//! | `register`      | `POST /workers`                        |
//! | `heartbeat`     | `POST /workers/{id}/heartbeat`         |
//! | `update_status` | `PUT /workers/{id}`                    |
//! | `pending_tasks` | `GET /tasks?status=pending&limit=N`    |
//! | `claim`         | `POST /tasks/{id}/claim`               |
//! | `complete`      | `POST /tasks/{id}/complete`            |
//! | `fail`          | `POST /tasks/{id}/fail`                |

use async_trait::async_trait;
use coordination::{Task, WorkerId, WorkerRegistration, WorkerStatus};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue request failed: {0}")]
    Transport(String),

    #[error("Queue returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Queue response parse error: {0}")]
    Decode(String),
}

impl QueueError {
    /// Transport failures and 5xx are worth retrying on the next tick.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Remote task queue operations used by a worker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueApi: Send + Sync {
    /// One-time registration; returns the assigned worker id.
    async fn register(&self, registration: &WorkerRegistration) -> QueueResult<WorkerId>;

    async fn heartbeat(&self, worker_id: &str) -> QueueResult<()>;

    async fn update_status(&self, worker_id: &str, status: WorkerStatus) -> QueueResult<()>;

    async fn pending_tasks(&self, limit: usize) -> QueueResult<Vec<Task>>;

    /// Optimistic claim. `Ok(None)` means someone else got there first.
    async fn claim(&self, task_id: &str, worker_id: &str) -> QueueResult<Option<Task>>;

    async fn complete(&self, task_id: &str, result: &serde_json::Value) -> QueueResult<()>;

    async fn fail(&self, task_id: &str, error: &str) -> QueueResult<()>;
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: WorkerId,
}

/// [`QueueApi`] over HTTP/JSON.
pub struct HttpQueueClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpQueueClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> QueueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into [`QueueError::Status`].
    async fn check(response: reqwest::Response) -> QueueResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::Status { status, body })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> QueueResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Self::check(response).await
    }
}

#[async_trait]
impl QueueApi for HttpQueueClient {
    async fn register(&self, registration: &WorkerRegistration) -> QueueResult<WorkerId> {
        let response = self
            .send(self.client.post(self.url("/workers")).json(registration))
            .await?;
        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| QueueError::Decode(e.to_string()))?;
        Ok(body.id)
    }

    async fn heartbeat(&self, worker_id: &str) -> QueueResult<()> {
        let url = self.url(&format!("/workers/{worker_id}/heartbeat"));
        self.send(self.client.post(url)).await?;
        Ok(())
    }

    async fn update_status(&self, worker_id: &str, status: WorkerStatus) -> QueueResult<()> {
        let url = self.url(&format!("/workers/{worker_id}"));
        self.send(
            self.client
                .put(url)
                .json(&serde_json::json!({ "status": status })),
        )
        .await?;
        Ok(())
    }

    async fn pending_tasks(&self, limit: usize) -> QueueResult<Vec<Task>> {
        let response = self
            .send(
                self.client
                    .get(self.url("/tasks"))
                    .query(&[("status", "pending".to_string()), ("limit", limit.to_string())]),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| QueueError::Decode(e.to_string()))
    }

    async fn claim(&self, task_id: &str, worker_id: &str) -> QueueResult<Option<Task>> {
        let url = self.url(&format!("/tasks/{task_id}/claim"));
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "worker_id": worker_id }))
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            debug!(task_id, status = %response.status(), "Claim rejected");
            return Ok(None);
        }

        let task = response
            .json()
            .await
            .map_err(|e| QueueError::Decode(e.to_string()))?;
        Ok(Some(task))
    }

    async fn complete(&self, task_id: &str, result: &serde_json::Value) -> QueueResult<()> {
        let url = self.url(&format!("/tasks/{task_id}/complete"));
        self.send(
            self.client
                .post(url)
                .json(&serde_json::json!({ "result": result })),
        )
        .await?;
        Ok(())
    }

    async fn fail(&self, task_id: &str, error: &str) -> QueueResult<()> {
        let url = self.url(&format!("/tasks/{task_id}/fail"));
        self.send(
            self.client
                .post(url)
                .json(&serde_json::json!({ "error": error })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(QueueError::Transport("reset".into()).is_retriable());
        assert!(QueueError::Status {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(!QueueError::Status {
            status: 400,
            body: String::new()
        }
        .is_retriable());
        assert!(!QueueError::Decode("eof".into()).is_retriable());
    }

    #[test]
    fn test_base_url_normalized() {
        let client =
            HttpQueueClient::new("http://queue:8080/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://queue:8080/api");
        assert_eq!(client.url("/tasks"), "http://queue:8080/api/tasks");
    }
}
