//! Fallback handler for task types with no dedicated handler

use async_trait::async_trait;
use coordination::{Capability, Task};

use super::{HandlerResult, TaskHandler};
use crate::egress::Egress;

/// Acknowledges the task and echoes its payload.
pub struct GenericHandler;

#[async_trait]
impl TaskHandler for GenericHandler {
    fn capability(&self) -> Capability {
        Capability::Generic
    }

    async fn handle(&self, task: &Task, _egress: &mut Egress) -> HandlerResult {
        Ok(serde_json::json!({
            "handled_by": "generic",
            "task_type": task.task_type,
            "payload": task.payload,
        }))
    }
}
