//! Task derivation and the external task-creation boundary
//!
//! Deriving tasks from a plan is a pure transformation; submitting them
//! crosses the [`TaskSink`] boundary, from which the core only needs an
//! acknowledgement per record. [`SimTaskSink`] is the in-memory
//! simulation used by the CLI and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use convoke_llm::{Plan, PlanAction};

/// One task record emitted toward the task-creation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_description: String,
    /// The plan action this task was derived from, verbatim.
    pub source_action: PlanAction,
}

/// Acknowledgement from the task boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// External task-creation service boundary.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Submit one task record; returns accepted/rejected.
    async fn submit(&self, request: &TaskRequest) -> TaskAck;
}

/// Convert plan actions into task records. Pure; cannot fail.
#[must_use]
pub fn derive_tasks(plan: &Plan) -> Vec<TaskRequest> {
    plan.actions
        .iter()
        .map(|action| TaskRequest {
            task_description: format!("{}: {}", action.action_type, action.reason),
            source_action: action.clone(),
        })
        .collect()
}

/// In-memory task service simulation.
pub struct SimTaskSink {
    tasks: Mutex<HashMap<String, TaskRequest>>,
    counter: AtomicU64,
}

impl SimTaskSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Number of tasks accepted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().expect("task store lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a stored task to a new assignee.
    pub fn reassign(&self, task_id: &str, to: &str) -> TaskAck {
        let mut tasks = self.tasks.lock().expect("task store lock poisoned");
        match tasks.get_mut(task_id) {
            Some(task) => {
                if !task.source_action.details.is_object() {
                    task.source_action.details = serde_json::json!({});
                }
                task.source_action.details["assignee"] = serde_json::Value::String(to.to_string());
                TaskAck {
                    accepted: true,
                    task_id: Some(task_id.to_string()),
                    reason: None,
                }
            }
            None => TaskAck {
                accepted: false,
                task_id: None,
                reason: Some("not_found".to_string()),
            },
        }
    }
}

impl Default for SimTaskSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskSink for SimTaskSink {
    async fn submit(&self, request: &TaskRequest) -> TaskAck {
        let id = format!("task-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.tasks
            .lock()
            .expect("task store lock poisoned")
            .insert(id.clone(), request.clone());
        debug!(task_id = %id, description = %request.task_description, "Task accepted");
        TaskAck {
            accepted: true,
            task_id: Some(id),
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        serde_json::from_str(
            r#"{
                "actions": [
                    {"action_type":"adjust_budget","details":{"campaign_id":"leadgen_nov"},"reason":"Reduce spend","confidence":0.7},
                    {"action_type":"create_task","details":{"task":"Investigate creatives"},"reason":"Creative fatigue","confidence":0.5}
                ],
                "summary": "s"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn derivation_is_one_task_per_action() {
        let tasks = derive_tasks(&plan());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_description, "adjust_budget: Reduce spend");
        assert_eq!(tasks[1].source_action.action_type, "create_task");
    }

    #[test]
    fn derivation_of_empty_plan_is_empty() {
        let plan = Plan {
            actions: vec![],
            summary: String::new(),
        };
        assert!(derive_tasks(&plan).is_empty());
    }

    #[tokio::test]
    async fn sim_sink_accepts_and_stores() {
        let sink = SimTaskSink::new();
        let tasks = derive_tasks(&plan());

        let ack = sink.submit(&tasks[0]).await;
        assert!(ack.accepted);
        assert_eq!(ack.task_id.as_deref(), Some("task-1"));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn reassign_moves_existing_and_rejects_unknown() {
        let sink = SimTaskSink::new();
        let tasks = derive_tasks(&plan());
        let ack = sink.submit(&tasks[1]).await;
        let id = ack.task_id.unwrap();

        let moved = sink.reassign(&id, "dev_sana");
        assert!(moved.accepted);

        let missing = sink.reassign("task-999", "dev_sana");
        assert!(!missing.accepted);
        assert_eq!(missing.reason.as_deref(), Some("not_found"));
    }
}
