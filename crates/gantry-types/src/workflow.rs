use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Dispatch,
    Skill,
    ToolCall,
    Condition,
    Parallel,
    Handoff,
    Delay,
    Notify,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Stop,
    Skip,
    Retry,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Stop
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max: u32,
    #[serde(default, with = "opt_duration_secs")]
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(rename = "if")]
    pub expr: String,
    pub then: String,
    #[serde(rename = "else")]
    pub or_else: Option<String>,
}

/// A single node in a Workflow's DAG. `kind` discriminates which fields are
/// meaningful, following the tagged-variant + handler-registry pattern
/// (see Design Notes §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default, with = "opt_duration_secs")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub condition: Option<ConditionSpec>,
    #[serde(default)]
    pub parallel: Vec<Step>,
    #[serde(default)]
    pub handoff_from: Option<String>,
    #[serde(default)]
    pub handoff_to_agent: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub tool_input_template: Option<Value>,
    #[serde(default, with = "opt_duration_secs")]
    pub delay: Option<Duration>,
    #[serde(default)]
    pub notify_message: Option<String>,
    #[serde(default)]
    pub notify_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Running,
    Success,
    Error,
    Cancelled,
    Timeout,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
    Timeout,
}

impl StepRunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepRunStatus::Pending | StepRunStatus::Running)
    }

    /// A step's `dependsOn` is satisfied by success or skip, never by
    /// error/timeout (those propagate failure upward via `onError`).
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, StepRunStatus::Success | StepRunStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRunResult {
    pub step_id: String,
    pub status: StepRunStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub retry_count: u32,
}

impl StepRunResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepRunStatus::Pending,
            output: String::new(),
            error: None,
            task_id: None,
            session_id: None,
            duration_ms: 0,
            cost_usd: 0.0,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    DryRun,
    Shadow,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Live
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_name: String,
    pub status: WorkflowRunStatus,
    #[serde(default)]
    pub mode: RunMode,
    pub variables: HashMap<String, String>,
    pub step_results: HashMap<String, StepRunResult>,
    #[serde(default)]
    pub total_cost_usd: f64,
    pub started_at_ms: u64,
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub workflow_run_id: String,
    pub from_agent: String,
    pub from_step: String,
    pub to_agent: String,
    pub to_step: String,
    pub output_payload: String,
    pub instruction: String,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowValidationError {
    UnknownDependency { step: String, depends_on: String },
    CycleDetected { steps: Vec<String> },
    ConditionMissingTarget { step: String },
    ParallelChildHasExternalDeps { parent: String, child: String },
    DuplicateStepId { id: String },
    UnknownAgent { step: String, agent: String },
    UnknownTool { step: String, tool: String },
}

impl std::fmt::Display for WorkflowValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDependency { step, depends_on } => {
                write!(f, "step `{step}` depends on unknown step `{depends_on}`")
            }
            Self::CycleDetected { steps } => write!(f, "cycle detected: {}", steps.join(" -> ")),
            Self::ConditionMissingTarget { step } => {
                write!(f, "condition step `{step}` is missing `then`/`else`")
            }
            Self::ParallelChildHasExternalDeps { parent, child } => write!(
                f,
                "parallel step `{parent}` child `{child}` must not declare dependsOn"
            ),
            Self::DuplicateStepId { id } => write!(f, "duplicate step id `{id}`"),
            Self::UnknownAgent { step, agent } => {
                write!(f, "step `{step}` references unknown agent `{agent}`")
            }
            Self::UnknownTool { step, tool } => {
                write!(f, "step `{step}` references unknown tool `{tool}`")
            }
        }
    }
}

impl std::error::Error for WorkflowValidationError {}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
