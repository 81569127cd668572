use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    High,
    Critical,
}

/// The single envelope type carried on the internal event bus. `topic`
/// groups subscribers (task, workflow, trigger, circuit, budget, system);
/// `data` is the topic-specific JSON payload so new topics never require a
/// bus-wide schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: String,
    pub topic: String,
    pub task_id: Option<String>,
    pub session_id: Option<String>,
    pub workflow_run_id: Option<String>,
    pub trigger_id: Option<String>,
    pub data: Value,
    pub at_ms: u64,
}

impl EngineEvent {
    pub fn new(topic: impl Into<String>, data: Value, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            task_id: None,
            session_id: None,
            workflow_run_id: None,
            trigger_id: None,
            data,
            at_ms: now_ms,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_workflow_run(mut self, run_id: impl Into<String>) -> Self {
        self.workflow_run_id = Some(run_id.into());
        self
    }
}

pub mod topics {
    pub const TASK_QUEUED: &str = "task.queued";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_PROGRESS: &str = "task.progress";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_STEP_STARTED: &str = "workflow.step.started";
    pub const WORKFLOW_STEP_COMPLETED: &str = "workflow.step.completed";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const TRIGGER_FIRED: &str = "trigger.fired";
    pub const TRIGGER_APPROVAL_PENDING: &str = "trigger.approval_pending";
    pub const CRON_JOB_FIRED: &str = "cron_job.fired";
    pub const CRON_JOB_APPROVAL_PENDING: &str = "cron_job.approval_pending";
    pub const CIRCUIT_OPENED: &str = "circuit.opened";
    pub const CIRCUIT_HALF_OPEN: &str = "circuit.half_open";
    pub const CIRCUIT_CLOSED: &str = "circuit.closed";
    pub const BUDGET_WARNING: &str = "budget.warning";
    pub const BUDGET_EXHAUSTED: &str = "budget.exhausted";
    pub const SYSTEM_PAUSED: &str = "system.paused";
    pub const SYSTEM_RESUMED: &str = "system.resumed";
    pub const CONFIG_RELOADED: &str = "config.reloaded";
}
