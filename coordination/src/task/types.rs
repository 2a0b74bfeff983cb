//! Core types shared between the queue client and the runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Identifier assigned to a task by the queue service
pub type TaskId = String;

/// Identifier assigned to a worker at registration
pub type WorkerId = String;

/// Lifecycle status of a task as reported by the queue service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker to claim it
    #[default]
    Pending,
    /// Claimed by a worker, not yet started
    Claimed,
    /// Handler is executing
    Running,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
    /// Withdrawn before completion
    Cancelled,
}

impl TaskStatus {
    /// Whether the task can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work pulled from the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Task type, matched against the capability table
    #[serde(rename = "type")]
    pub task_type: String,

    /// Opaque handler input
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub status: TaskStatus,

    /// Worker currently holding the claim, if any. The queue may send `""`
    /// for an unclaimed task.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub claimed_by: Option<WorkerId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with an empty timeline
    pub fn new(
        id: impl Into<TaskId>,
        task_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            status: TaskStatus::Pending,
            claimed_by: None,
            created_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the task is still open for claiming
    pub fn is_claimable(&self) -> bool {
        self.status == TaskStatus::Pending && self.claimed_by.is_none()
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Worker availability as reported to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Online,
    Busy,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Body of the one-time registration call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub name: String,
    #[serde(rename = "type")]
    pub worker_type: String,
    /// Capability tags in wire form (e.g. `"web-scrape"`, `"*"`)
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A registered worker as seen by the queue service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    #[serde(rename = "type")]
    pub worker_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Worker {
    /// Build the local view of a worker right after registration
    pub fn registered(id: impl Into<WorkerId>, registration: &WorkerRegistration) -> Self {
        Self {
            id: id.into(),
            name: registration.name.clone(),
            worker_type: registration.worker_type.clone(),
            capabilities: registration.capabilities.clone(),
            status: WorkerStatus::Online,
            last_heartbeat: None,
        }
    }

    /// Record a successful heartbeat
    pub fn touch(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }
}
