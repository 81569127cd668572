use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agents::AgentRegistry;
use crate::config::ConfigStore;
use crate::workflows::WorkflowRegistry;

/// Owns configuration, the agent registry, and the workflow registry;
/// drives `SIGHUP` reloads and `SIGTERM`/`SIGINT` graceful shutdown. Does
/// not itself run B-M — it hands each of them the `CancellationToken`
/// they spawn their background loop against, and the config/agent/
/// workflow snapshots they read from.
pub struct ReloadSupervisor {
    workspace_root: PathBuf,
    config: ConfigStore,
    agents: AgentRegistry,
    workflows: WorkflowRegistry,
    shutdown: CancellationToken,
}

impl ReloadSupervisor {
    pub async fn new(workspace_root: impl Into<PathBuf>, config_path: PathBuf) -> anyhow::Result<Self> {
        let workspace_root: PathBuf = workspace_root.into();
        let config = ConfigStore::new(&config_path, None).await?;
        let agents = AgentRegistry::new(&workspace_root).await?;
        let workflows = WorkflowRegistry::new(&workspace_root).await?;
        Ok(Self {
            workspace_root,
            config,
            agents,
            workflows,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    /// The token every B-M background loop should select against. Cancelled
    /// once graceful shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Re-reads config file layers and `.gantry/agent`/`.gantry/workflow`
    /// definitions. Config validation failure keeps the previous snapshot;
    /// agent/workflow reload always succeeds (a malformed file is simply
    /// skipped) since neither carries the same blast radius as a bad
    /// provider config.
    pub async fn reload(&self) -> anyhow::Result<()> {
        self.config.reload().await?;
        self.agents.reload(&self.workspace_root).await?;
        self.workflows.reload(&self.workspace_root).await?;
        tracing::info!("reload supervisor: configuration, agents, and workflows reloaded");
        Ok(())
    }

    /// Begins graceful shutdown: cancels the shared token so every spawned
    /// loop stops admitting new work, then waits up to `drain_timeout` for
    /// callers to report drained (via `drained`) before returning. Callers
    /// that don't report in time are assumed to have been force-cancelled
    /// by their own cancellation-token handling.
    pub async fn shutdown(&self, drain_timeout: Duration, drained: impl std::future::Future<Output = ()>) {
        tracing::info!("reload supervisor: closing admission gate");
        self.shutdown.cancel();
        if tokio::time::timeout(drain_timeout, drained).await.is_err() {
            tracing::warn!(?drain_timeout, "drain timeout elapsed with tasks still in flight");
        }
    }

    /// Spawns a task that listens for `SIGHUP` (reload) and `SIGTERM`/
    /// `SIGINT` (shutdown trigger only — the caller still awaits
    /// `shutdown()` with its own drain future). Unix-only, matching the
    /// signal set named in the spec.
    #[cfg(unix)]
    pub fn spawn_signal_listener(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGHUP handler");
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = supervisor.shutdown.cancelled() => return,
                    _ = hangup.recv() => {
                        if let Err(err) = supervisor.reload().await {
                            tracing::warn!(error = %err, "reload rejected, keeping previous snapshot");
                        }
                    }
                    _ = terminate.recv() => {
                        supervisor.shutdown.cancel();
                        return;
                    }
                    result = tokio::signal::ctrl_c() => {
                        if result.is_ok() {
                            supervisor.shutdown.cancel();
                        }
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_cancels_token_and_waits_for_drain() {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("GANTRY_GLOBAL_CONFIG");
        let supervisor = ReloadSupervisor::new(dir.path(), dir.path().join("project.json")).await.unwrap();
        let token = supervisor.shutdown_token();

        supervisor
            .shutdown(Duration::from_millis(200), async move {
                assert!(token.is_cancelled());
            })
            .await;
        assert!(supervisor.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn reload_rejects_bad_config_but_registries_still_reload() {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("GANTRY_GLOBAL_CONFIG");
        let project_path = dir.path().join("project.json");
        let supervisor = ReloadSupervisor::new(dir.path(), project_path.clone()).await.unwrap();

        tokio::fs::write(&project_path, r#"{"default_provider":"missing"}"#).await.unwrap();
        assert!(supervisor.reload().await.is_err());
    }
}
