use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfflineQueueKind {
    Notification,
    WebhookDelivery,
}

/// An outbound side effect that could not be delivered (channel down,
/// webhook endpoint unreachable) and is persisted for retry with backoff
/// rather than dropped (§5, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineQueueEntry {
    pub id: String,
    pub kind: OfflineQueueKind,
    pub target: String,
    pub payload: Value,
    pub attempts: u32,
    pub next_attempt_at_ms: u64,
    pub created_at_ms: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}
