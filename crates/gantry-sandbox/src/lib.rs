use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gantry_types::{GantryError, GantryResult, SandboxPolicy};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SandboxHandle {
    pub id: String,
    pub session_id: String,
    pub image: String,
}

/// External container plugin seam. A reference process-backed
/// implementation is provided below; production deployments are expected
/// to supply their own (Firecracker, gVisor, Docker) behind this trait.
#[async_trait]
pub trait SandboxPlugin: Send + Sync {
    async fn allocate(&self, session_id: &str, image: &str) -> GantryResult<SandboxHandle>;
    async fn release(&self, handle: &SandboxHandle) -> GantryResult<()>;
}

/// Launches `docker run` (or any configured container binary) per session
/// and keeps the child alive for the sandbox's lifetime. Intended as the
/// out-of-the-box plugin; swappable via `SandboxPlugin`.
pub struct ProcessSandboxPlugin {
    container_bin: String,
}

impl ProcessSandboxPlugin {
    pub fn new(container_bin: impl Into<String>) -> Self {
        Self {
            container_bin: container_bin.into(),
        }
    }
}

impl Default for ProcessSandboxPlugin {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl SandboxPlugin for ProcessSandboxPlugin {
    async fn allocate(&self, session_id: &str, image: &str) -> GantryResult<SandboxHandle> {
        let id = Uuid::new_v4().to_string();
        let status = tokio::process::Command::new(&self.container_bin)
            .args(["create", "--label", &format!("gantry-session={session_id}"), image])
            .status()
            .await
            .map_err(|e| GantryError::SandboxUnavailable(e.to_string()))?;
        if !status.success() {
            return Err(GantryError::SandboxUnavailable(format!(
                "{} create exited with {}",
                self.container_bin, status
            )));
        }
        Ok(SandboxHandle {
            id,
            session_id: session_id.to_string(),
            image: image.to_string(),
        })
    }

    async fn release(&self, handle: &SandboxHandle) -> GantryResult<()> {
        let _ = tokio::process::Command::new(&self.container_bin)
            .args(["rm", "-f", &handle.id])
            .status()
            .await;
        Ok(())
    }
}

/// Per-session sandbox lifecycle manager. Enforces the role's
/// `SandboxPolicy`: `required` fails the task if allocation fails,
/// `optional` degrades silently, `never` never allocates (§4.D).
pub struct SandboxManager {
    plugin: Arc<dyn SandboxPlugin>,
    active: RwLock<HashMap<String, SandboxHandle>>,
}

impl SandboxManager {
    pub fn new(plugin: Arc<dyn SandboxPlugin>) -> Self {
        Self {
            plugin,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `Ok(None)` when the policy permits proceeding without a
    /// sandbox (never, or optional-and-unavailable).
    pub async fn acquire_for_policy(
        &self,
        policy: SandboxPolicy,
        session_id: &str,
        image: &str,
    ) -> GantryResult<Option<SandboxHandle>> {
        match policy {
            SandboxPolicy::Never => Ok(None),
            SandboxPolicy::Required => {
                let handle = self.allocate(session_id, image).await?;
                Ok(Some(handle))
            }
            SandboxPolicy::Optional => match self.allocate(session_id, image).await {
                Ok(handle) => Ok(Some(handle)),
                Err(err) => {
                    tracing::warn!(session_id, %err, "optional sandbox unavailable, continuing unsandboxed");
                    Ok(None)
                }
            },
        }
    }

    async fn allocate(&self, session_id: &str, image: &str) -> GantryResult<SandboxHandle> {
        if let Some(existing) = self.active.read().await.get(session_id) {
            return Ok(existing.clone());
        }
        let handle = self.plugin.allocate(session_id, image).await?;
        self.active
            .write()
            .await
            .insert(session_id.to_string(), handle.clone());
        Ok(handle)
    }

    pub async fn release(&self, session_id: &str) -> GantryResult<()> {
        if let Some(handle) = self.active.write().await.remove(session_id) {
            self.plugin.release(&handle).await?;
        }
        Ok(())
    }
}

pub type SharedSandboxManager = Arc<SandboxManager>;
