use serde::{Deserialize, Serialize};

/// The taxonomy every core component wraps its failures into before they
/// cross a component boundary. Never rethrow an upstream error raw — wrap
/// it here and keep the original detail in `cause`.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "kind", content = "cause")]
pub enum GantryError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("workflow invalid: {0}")]
    WorkflowInvalid(String),
    #[error("trigger not found: {0}")]
    TriggerNotFound(String),
    #[error("cron job not found: {0}")]
    CronJobNotFound(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("paused")]
    Paused,
    #[error("over budget: {0}")]
    OverBudget(String),
    #[error("approval required: {0}")]
    ApprovalRequired(String),
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),
    #[error("disabled: {0}")]
    Disabled(String),
    #[error("admission timeout")]
    AdmissionTimeout,
    #[error("cooldown active: {0}")]
    CooldownActive(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("timeout")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GantryError {
    /// The stable string used in the history `error` column and the HTTP
    /// error body's `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            GantryError::BadRequest(_) => "bad_request",
            GantryError::AgentNotFound(_) => "agent_not_found",
            GantryError::WorkflowInvalid(_) => "workflow_invalid",
            GantryError::TriggerNotFound(_) => "trigger_not_found",
            GantryError::CronJobNotFound(_) => "cron_job_not_found",
            GantryError::ToolNotFound(_) => "tool_not_found",
            GantryError::Paused => "paused",
            GantryError::OverBudget(_) => "over_budget",
            GantryError::ApprovalRequired(_) => "approval_required",
            GantryError::SandboxUnavailable(_) => "sandbox_unavailable",
            GantryError::Disabled(_) => "disabled",
            GantryError::AdmissionTimeout => "admission_timeout",
            GantryError::CooldownActive(_) => "cooldown_active",
            GantryError::ProviderUnavailable(_) => "provider_unavailable",
            GantryError::ProviderError(_) => "provider_error",
            GantryError::RateLimited(_) => "rate_limited",
            GantryError::Unauthorized => "unauthorized",
            GantryError::Timeout => "timeout",
            GantryError::Cancelled => "cancelled",
            GantryError::Internal(_) => "internal",
        }
    }

    /// Whether a failure on this provider attempt should rotate to the next
    /// provider in the fallback chain rather than surfacing immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GantryError::RateLimited(_) | GantryError::ProviderError(_) | GantryError::Timeout
        )
    }

    /// Notification priority a failure of this kind implies, per §7.
    pub fn notification_priority(&self) -> crate::NotificationPriority {
        use crate::NotificationPriority::*;
        match self {
            GantryError::Paused => Critical,
            GantryError::OverBudget(_) | GantryError::Timeout => High,
            _ => Normal,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            GantryError::BadRequest(_)
            | GantryError::WorkflowInvalid(_)
            | GantryError::Disabled(_) => 400,
            GantryError::Unauthorized => 401,
            GantryError::AgentNotFound(_)
            | GantryError::TriggerNotFound(_)
            | GantryError::CronJobNotFound(_)
            | GantryError::ToolNotFound(_) => 404,
            GantryError::ApprovalRequired(_) | GantryError::CooldownActive(_) => 409,
            GantryError::RateLimited(_) => 429,
            GantryError::Paused
            | GantryError::OverBudget(_)
            | GantryError::SandboxUnavailable(_)
            | GantryError::AdmissionTimeout
            | GantryError::ProviderUnavailable(_)
            | GantryError::ProviderError(_)
            | GantryError::Timeout
            | GantryError::Cancelled
            | GantryError::Internal(_) => 500,
        }
    }
}

pub type GantryResult<T> = Result<T, GantryError>;
