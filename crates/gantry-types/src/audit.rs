use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TaskDispatched,
    TaskCompleted,
    WorkflowRun,
    TriggerFired,
    ConfigReloaded,
    AgentCreated,
    AgentUpdated,
    AgentDeleted,
    ApprovalGranted,
    ApprovalDenied,
    CircuitOpened,
    CircuitClosed,
    BudgetKillSwitchToggled,
    RetentionPurged,
}

/// Immutable, append-only record of every privileged action taken against
/// the daemon, used by `gantry-retention` for purge and by the HTTP API's
/// `/audit` endpoint. Never updated or deleted except by the retention
/// sweep once past its retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub action: AuditAction,
    pub actor: String,
    pub subject: Option<String>,
    pub detail: Value,
    pub at_ms: u64,
}
