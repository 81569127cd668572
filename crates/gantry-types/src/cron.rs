use serde::{Deserialize, Serialize};

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Scheduled task definition evaluated once a minute by the Cron Scheduler
/// (§4.H). Distinct from a cron-kind `Trigger`: a Cron Job starts a single
/// Task directly via the Dispatcher, rather than instantiating a Workflow
/// Run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub agent: String,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub enabled: bool,
    /// When set, a firing is held in the approval set instead of starting
    /// its Task immediately; only an explicit operator approval dispatches
    /// it, mirroring `Trigger.approval_required`.
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub misfire_policy: MisfirePolicy,

    // Runtime state, persisted alongside the definition so overlap
    // suppression and the error counter survive a daemon restart.
    #[serde(default)]
    pub last_run_at_ms: Option<u64>,
    #[serde(default)]
    pub next_run_at_ms: Option<u64>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub consecutive_errors: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    FireOnceImmediately,
    Skip,
}

impl Default for MisfirePolicy {
    fn default() -> Self {
        MisfirePolicy::FireOnceImmediately
    }
}
