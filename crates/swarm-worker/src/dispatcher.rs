//! Task dispatcher
//!
//! Pulls one candidate task at a time, filters it by capability, claims it
//! optimistically, runs the matching handler, and reports the outcome.
//!
//! ```text
//! poll ─▶ eligible? ─no──▶ Ignored (left for another worker)
//!            │yes
//!            ▼
//!          claim ─miss─▶ ClaimMissed (benign)
//!            │won
//!            ▼
//!   busy ─▶ handler ─▶ complete / fail ─▶ online
//! ```
//!
//! The dispatcher is driven from a single loop and executes handlers inline,
//! so a worker never holds more than one task.

use chrono::Utc;
use coordination::{
    CapabilitySet, CapabilityTable, Task, TaskId, TaskStatus, WorkerId, WorkerStatus,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::egress::Egress;
use crate::handlers::{HandlerError, HandlerRegistry, HandlerResult};
use crate::queue::{QueueApi, QueueError};

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A task is already in flight; nothing was queried.
    Busy,
    /// Queue had no pending task.
    Idle,
    /// Task type is outside this worker's capabilities.
    Ignored { task_id: TaskId, task_type: String },
    /// Another worker won the claim.
    ClaimMissed { task_id: TaskId },
    Completed { task_id: TaskId },
    Failed { task_id: TaskId, error: String },
    /// Poll or claim request failed; retried next tick.
    Unreachable { error: String },
}

/// Running totals for this worker instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub completed: u64,
    pub failed: u64,
    pub claim_misses: u64,
    pub ignored: u64,
}

pub struct Dispatcher {
    worker_id: WorkerId,
    queue: Arc<dyn QueueApi>,
    capabilities: CapabilitySet,
    table: CapabilityTable,
    handlers: HandlerRegistry,
    egress: Egress,
    current: Option<Task>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        worker_id: WorkerId,
        queue: Arc<dyn QueueApi>,
        capabilities: CapabilitySet,
        table: CapabilityTable,
        handlers: HandlerRegistry,
        egress: Egress,
    ) -> Self {
        Self {
            worker_id,
            queue,
            capabilities,
            table,
            handlers,
            egress,
            current: None,
            stats: DispatchStats::default(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The task currently executing, if any.
    pub fn in_flight(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn egress(&self) -> &Egress {
        &self.egress
    }

    /// Poll tick: fetch one pending task and try to run it.
    pub async fn poll_once(&mut self) -> DispatchOutcome {
        if self.current.is_some() {
            return DispatchOutcome::Busy;
        }

        let tasks = match self.queue.pending_tasks(1).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(worker_id = %self.worker_id, error = %e, "Poll failed; retrying next tick");
                return DispatchOutcome::Unreachable {
                    error: e.to_string(),
                };
            }
        };

        match tasks.into_iter().next() {
            Some(task) => self.offer(task).await,
            None => DispatchOutcome::Idle,
        }
    }

    /// Filter, claim and run a candidate task (polled or pushed).
    ///
    /// Only the capability filter runs locally; whether the task is still
    /// free is up to the queue's claim call.
    pub async fn offer(&mut self, task: Task) -> DispatchOutcome {
        if self.current.is_some() {
            return DispatchOutcome::Busy;
        }

        if !self.table.is_eligible(&self.capabilities, &task.task_type) {
            debug!(task_id = %task.id, task_type = %task.task_type, "Task not for this worker");
            self.stats.ignored += 1;
            return DispatchOutcome::Ignored {
                task_id: task.id,
                task_type: task.task_type,
            };
        }

        match self.queue.claim(&task.id, &self.worker_id).await {
            Ok(Some(claimed)) => self.execute(claimed).await,
            Ok(None) => {
                debug!(task_id = %task.id, "Claim lost to another worker");
                self.stats.claim_misses += 1;
                DispatchOutcome::ClaimMissed { task_id: task.id }
            }
            Err(QueueError::Decode(detail)) => self.abandon_claim(task.id, detail).await,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Claim request failed");
                DispatchOutcome::Unreachable {
                    error: e.to_string(),
                }
            }
        }
    }

    /// The queue accepted the claim but the task body was unreadable. The
    /// claim is ours, so hand the task back as failed.
    async fn abandon_claim(&mut self, task_id: TaskId, detail: String) -> DispatchOutcome {
        let error = format!("Claimed task could not be decoded: {detail}");
        warn!(task_id = %task_id, error = %error, "Releasing unreadable claim");
        if let Err(e) = self.queue.fail(&task_id, &error).await {
            warn!(task_id = %task_id, error = %e, "Failed to report task failure");
        }
        self.stats.failed += 1;
        DispatchOutcome::Failed { task_id, error }
    }

    async fn execute(&mut self, mut task: Task) -> DispatchOutcome {
        task.status = TaskStatus::Running;
        task.claimed_by = Some(self.worker_id.clone());
        task.started_at = Some(Utc::now());
        self.current = Some(task.clone());

        info!(task_id = %task.id, task_type = %task.task_type, "Task claimed");
        self.report_status(WorkerStatus::Busy).await;

        let result = self.run_handler(&task).await;
        let outcome = match result {
            Ok(value) => {
                if let Err(e) = self.queue.complete(&task.id, &value).await {
                    warn!(task_id = %task.id, error = %e, "Failed to report completion");
                }
                info!(task_id = %task.id, "Task completed");
                self.stats.completed += 1;
                DispatchOutcome::Completed { task_id: task.id }
            }
            Err(e) => {
                let error = e.to_string();
                if let Err(report) = self.queue.fail(&task.id, &error).await {
                    warn!(task_id = %task.id, error = %report, "Failed to report task failure");
                }
                warn!(task_id = %task.id, error = %error, "Task failed");
                self.stats.failed += 1;
                DispatchOutcome::Failed {
                    task_id: task.id,
                    error,
                }
            }
        };

        self.current = None;
        self.report_status(WorkerStatus::Online).await;
        if let Some(active) = self.egress.active_endpoint() {
            debug!(
                endpoint = %active.address,
                streak = active.fail_count,
                "Egress identity after task"
            );
        }
        outcome
    }

    /// Run the handler for `task`, converting errors and panics alike.
    async fn run_handler(&mut self, task: &Task) -> HandlerResult {
        let required = self.table.required_for(&task.task_type);
        let Some(handler) = self.handlers.get(required) else {
            return Err(HandlerError::NoHandler(required));
        };

        AssertUnwindSafe(handler.handle(task, &mut self.egress))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))))
    }

    async fn report_status(&self, status: WorkerStatus) {
        if let Err(e) = self.queue.update_status(&self.worker_id, status).await {
            warn!(worker_id = %self.worker_id, %status, error = %e, "Status report failed");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
