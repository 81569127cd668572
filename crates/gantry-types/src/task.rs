use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Plan,
    AcceptEdits,
    AutoEdit,
    BypassPermissions,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Plan
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

/// A single LLM invocation unit. Never mutated after it reaches a terminal
/// `TaskStatus`; a terminal task writes exactly one history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub agent: String,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub accessible_directories: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub system_prompt_override: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
    /// Generated at ingress if absent; threaded through every tracing span
    /// and the eventual history row.
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl Task {
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            name: None,
            agent: agent.into(),
            prompt: prompt.into(),
            model: None,
            provider: None,
            working_directory: None,
            accessible_directories: None,
            system_prompt_override: None,
            session_id: None,
            timeout: default_timeout(),
            budget_usd: None,
            permission_mode: PermissionMode::default(),
            sandbox: false,
            source: None,
            workflow_run_id: None,
            step_id: None,
            trace_id: None,
        }
    }

    /// Fill in an id and trace id if the caller did not supply one.
    pub fn normalize(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.trace_id.is_none() {
            self.trace_id = Some(Uuid::new_v4().to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Success)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
