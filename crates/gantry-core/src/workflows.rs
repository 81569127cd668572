use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::fs;
use tokio::sync::RwLock;

use gantry_types::Workflow;

/// Workflow definition registry: loads `.gantry/workflow/*.yaml` files
/// into the snapshot the Workflow Engine and Scheduler run against.
/// Unlike `AgentRegistry` there are no built-ins — an empty workspace
/// simply has no workflows registered.
#[derive(Clone)]
pub struct WorkflowRegistry {
    workflows: Arc<RwLock<HashMap<String, Workflow>>>,
}

impl WorkflowRegistry {
    pub async fn new(workspace_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root: PathBuf = workspace_root.into();
        let loaded = load_workflows(root.join(".gantry").join("workflow")).await?;
        Ok(Self {
            workflows: Arc::new(RwLock::new(loaded)),
        })
    }

    pub fn snapshot(&self) -> Arc<RwLock<HashMap<String, Workflow>>> {
        self.workflows.clone()
    }

    pub async fn list(&self) -> Vec<Workflow> {
        let mut workflows = self.workflows.read().await.values().cloned().collect::<Vec<_>>();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }

    pub async fn get(&self, name: &str) -> Option<Workflow> {
        self.workflows.read().await.get(name).cloned()
    }

    /// Re-reads `.gantry/workflow/*.yaml`/`.yml`/`.json`, replacing the
    /// whole snapshot. A workflow definition removed from disk drops out
    /// of the registry on the next reload; in-flight runs of it are
    /// unaffected since they already hold their own copy of the steps.
    pub async fn reload(&self, workspace_root: impl Into<PathBuf>) -> anyhow::Result<()> {
        let root: PathBuf = workspace_root.into();
        let loaded = load_workflows(root.join(".gantry").join("workflow")).await?;
        *self.workflows.write().await = loaded;
        Ok(())
    }
}

async fn load_workflows(dir: PathBuf) -> anyhow::Result<HashMap<String, Workflow>> {
    let mut out = HashMap::new();
    let mut entries = match fs::read_dir(&dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", dir.display())),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            continue;
        };
        if !matches!(ext, "yaml" | "yml" | "json") {
            continue;
        }
        let raw = fs::read_to_string(&path).await?;
        let workflow: Workflow = if ext == "json" {
            serde_json::from_str(&raw).with_context(|| format!("invalid workflow json: {}", path.display()))?
        } else {
            serde_yaml::from_str(&raw).with_context(|| format!("invalid workflow yaml: {}", path.display()))?
        };
        out.insert(workflow.name.clone(), workflow);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_workflow_directory_yields_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkflowRegistry::new(dir.path()).await.unwrap();
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn yaml_workflow_file_loads_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let workflow_dir = dir.path().join(".gantry").join("workflow");
        fs::create_dir_all(&workflow_dir).await.unwrap();
        fs::write(
            workflow_dir.join("triage.yaml"),
            "name: triage\nsteps:\n  - id: s1\n    kind: dispatch\n    agent: general\n    prompt_template: hello\n",
        )
        .await
        .unwrap();

        let registry = WorkflowRegistry::new(dir.path()).await.unwrap();
        let workflow = registry.get("triage").await.expect("workflow loaded");
        assert_eq!(workflow.steps.len(), 1);
    }

    #[tokio::test]
    async fn reload_drops_workflows_removed_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let workflow_dir = dir.path().join(".gantry").join("workflow");
        fs::create_dir_all(&workflow_dir).await.unwrap();
        let file = workflow_dir.join("temp.yaml");
        fs::write(&file, "name: temp\nsteps: []\n").await.unwrap();

        let registry = WorkflowRegistry::new(dir.path()).await.unwrap();
        assert!(registry.get("temp").await.is_some());

        fs::remove_file(&file).await.unwrap();
        registry.reload(dir.path()).await.unwrap();
        assert!(registry.get("temp").await.is_none());
    }
}
