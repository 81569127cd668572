use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub message_count: u64,
}

/// Durable conversation transcript. Reads are concurrent; writes are
/// serialized per-session (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent: String,
    #[serde(default)]
    pub source: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub totals: SessionTotals,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Session {
    pub fn new(agent: impl Into<String>, source: Option<String>, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent: agent.into(),
            source,
            status: SessionStatus::Active,
            title: None,
            totals: SessionTotals::default(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

/// Append-only message. `content` may be encrypted at rest by the storage
/// layer; this type carries plaintext once decrypted for the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub created_at_ms: u64,
}

impl SessionMessage {
    pub fn new(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            model: None,
            task_id: None,
            created_at_ms: now_ms,
        }
    }
}
