use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct RunningTask {
    pub task_id: String,
    pub agent: String,
    pub parent_id: Option<String>,
    pub started_at_ms: u64,
}

/// Process-wide registry of in-flight tasks and their cancellation tokens
/// (§2, component L "Dispatch State"). A single supervisor-owned instance
/// is threaded through the Dispatcher, Workflow Engine, and HTTP API so a
/// `/tasks/{id}/cancel` call can reach any running task without a module
/// static.
#[derive(Clone, Default)]
pub struct DispatchState {
    running: Arc<RwLock<HashMap<String, (RunningTask, CancellationToken)>>>,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, task: RunningTask) -> CancellationToken {
        let token = CancellationToken::new();
        self.running
            .write()
            .await
            .insert(task.task_id.clone(), (task, token.clone()));
        token
    }

    pub async fn unregister(&self, task_id: &str) {
        self.running.write().await.remove(task_id);
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        if let Some((_, token)) = self.running.read().await.get(task_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancels every running task whose `parent_id` matches — used when a
    /// parent task or workflow run is cancelled, so cancellation
    /// propagates parent to children (never the reverse, per §8).
    pub async fn cancel_children_of(&self, parent_id: &str) {
        for (task, token) in self.running.read().await.values() {
            if task.parent_id.as_deref() == Some(parent_id) {
                token.cancel();
            }
        }
    }

    pub async fn list_running(&self) -> Vec<RunningTask> {
        self.running.read().await.values().map(|(t, _)| t.clone()).collect()
    }
}
