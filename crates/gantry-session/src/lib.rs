use std::collections::HashMap;
use std::sync::Arc;

use gantry_storage::Store;
use gantry_types::{GantryError, GantryResult, MessageRole, Session, SessionMessage};
use tokio::sync::{Mutex, RwLock};

/// Conversation sessions with at-most-one-writer semantics: reads run
/// concurrently against the durable store, writes to a given session are
/// serialized through that session's own lock (§4.F, §8 Concurrency).
pub struct SessionStore {
    store: Arc<Store>,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(session_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create(&self, agent: &str, source: Option<String>, now_ms: u64) -> GantryResult<Session> {
        let session = Session::new(agent, source, now_ms);
        self.store
            .put_session(&session)
            .await
            .map_err(|e| GantryError::Internal(e.to_string()))?;
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> GantryResult<Session> {
        self.store
            .get_session(id)
            .await
            .map_err(|e| GantryError::Internal(e.to_string()))?
            .ok_or_else(|| GantryError::BadRequest(format!("session `{id}` not found")))
    }

    pub async fn history(&self, id: &str) -> GantryResult<Vec<SessionMessage>> {
        self.store
            .list_messages(id)
            .await
            .map_err(|e| GantryError::Internal(e.to_string()))
    }

    /// Appends a message and atomically updates the session's rolling
    /// totals. Holds the per-session lock for the whole read-modify-write
    /// so two concurrent appends cannot race on `totals`.
    pub async fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: impl Into<String>,
        cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
        model: Option<String>,
        task_id: Option<String>,
        now_ms: u64,
    ) -> GantryResult<SessionMessage> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.get(session_id).await?;
        let mut message = SessionMessage::new(session_id, role, content, now_ms);
        message.cost_usd = cost_usd;
        message.input_tokens = input_tokens;
        message.output_tokens = output_tokens;
        message.model = model;
        message.task_id = task_id;

        self.store
            .append_message(&message)
            .await
            .map_err(|e| GantryError::Internal(e.to_string()))?;

        session.totals.cost_usd += cost_usd;
        session.totals.input_tokens += input_tokens;
        session.totals.output_tokens += output_tokens;
        session.totals.message_count += 1;
        session.updated_at_ms = now_ms;
        self.store
            .put_session(&session)
            .await
            .map_err(|e| GantryError::Internal(e.to_string()))?;

        Ok(message)
    }

    pub async fn archive(&self, session_id: &str, now_ms: u64) -> GantryResult<()> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;
        let mut session = self.get(session_id).await?;
        session.status = gantry_types::SessionStatus::Archived;
        session.updated_at_ms = now_ms;
        self.store
            .put_session(&session)
            .await
            .map_err(|e| GantryError::Internal(e.to_string()))
    }
}

pub type SharedSessionStore = Arc<SessionStore>;
