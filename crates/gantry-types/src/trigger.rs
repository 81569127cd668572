use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Cron,
    Event,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    Cron {
        expression: String,
        #[serde(default)]
        timezone: Option<String>,
    },
    Event {
        topic: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Webhook {
        path: String,
        #[serde(default)]
        secret: Option<String>,
    },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Cron { .. } => TriggerKind::Cron,
            TriggerSpec::Event { .. } => TriggerKind::Event,
            TriggerSpec::Webhook { .. } => TriggerKind::Webhook,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    RunWorkflow,
    DispatchTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub spec: TriggerSpec,
    pub action: TriggerAction,
    pub target: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub last_fired_at_ms: Option<u64>,
    #[serde(default)]
    pub misfire_count: u32,
    /// Seconds that must elapse after a firing before the trigger can fire
    /// again, independent of the cron expression's own cadence.
    #[serde(default)]
    pub cooldown_secs: u64,
    /// When set, a firing is held in the approval set instead of running
    /// immediately; only an explicit operator approval dispatches it.
    #[serde(default)]
    pub approval_required: bool,
}
