use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::fs;
use tokio::sync::RwLock;

use gantry_types::{AgentDefinition, AgentFrontmatter, SandboxPolicy};

/// Agent registry backing the snapshot consumed by the Task Dispatcher,
/// Workflow Engine, and Scheduler. Built-in agents are always present;
/// `.gantry/agent/*.md` files in the workspace can add or override them.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentDefinition>>>,
    default_agent: String,
}

impl AgentRegistry {
    pub async fn new(workspace_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let mut by_name = HashMap::new();
        for agent in default_agents() {
            by_name.insert(agent.name.clone(), agent);
        }

        let root: PathBuf = workspace_root.into();
        let custom = load_custom_agents(root.join(".gantry").join("agent")).await?;
        for agent in custom {
            by_name.insert(agent.name.clone(), agent);
        }

        Ok(Self {
            agents: Arc::new(RwLock::new(by_name)),
            default_agent: "general".to_string(),
        })
    }

    /// Exposes the live snapshot so `gantry-dispatch`, `gantry-workflow`,
    /// and `gantry-scheduler` can hold onto it directly rather than
    /// polling the registry.
    pub fn snapshot(&self) -> Arc<RwLock<HashMap<String, AgentDefinition>>> {
        self.agents.clone()
    }

    pub async fn list(&self) -> Vec<AgentDefinition> {
        let mut agents = self.agents.read().await.values().cloned().collect::<Vec<_>>();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub async fn get(&self, name: Option<&str>) -> AgentDefinition {
        let wanted = name.unwrap_or(&self.default_agent);
        let agents = self.agents.read().await;
        agents
            .get(wanted)
            .cloned()
            .or_else(|| agents.get(&self.default_agent).cloned())
            .unwrap_or_else(|| blank_agent(&self.default_agent))
    }

    /// Re-reads `.gantry/agent/*.md`, replacing any custom agent already
    /// present under that name. Built-ins are untouched. Part of the
    /// Reload Supervisor's `SIGHUP` handling.
    pub async fn reload(&self, workspace_root: impl Into<PathBuf>) -> anyhow::Result<()> {
        let root: PathBuf = workspace_root.into();
        let custom = load_custom_agents(root.join(".gantry").join("agent")).await?;
        let mut agents = self.agents.write().await;
        for agent in default_agents() {
            agents.entry(agent.name.clone()).or_insert(agent);
        }
        for agent in custom {
            agents.insert(agent.name.clone(), agent);
        }
        Ok(())
    }
}

fn blank_agent(name: &str) -> AgentDefinition {
    AgentDefinition {
        name: name.to_string(),
        system_prompt_path: None,
        system_prompt: None,
        default_model: None,
        preferred_provider: None,
        fallback_providers: vec![],
        allowed_directories: vec![],
        permission_mode: None,
        tool_policy: HashMap::new(),
        sandbox_policy: SandboxPolicy::Never,
        sandbox_image: None,
        hidden: false,
        free: false,
    }
}

fn default_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            system_prompt: Some(
                "You are a general-purpose task agent running inside an orchestration \
daemon. Inspect the provided task prompt and any tool results before answering, \
and prefer concrete, verifiable output over speculation."
                    .to_string(),
            ),
            ..blank_agent("general")
        },
        AgentDefinition {
            system_prompt: Some(
                "You gather evidence before concluding. Use the tools available to you \
to inspect state rather than guessing, and summarize findings concisely."
                    .to_string(),
            ),
            ..blank_agent("researcher")
        },
        AgentDefinition {
            system_prompt: Some(
                "You review the work of another agent's output for correctness and \
completeness. Call out concrete defects; do not rubber-stamp."
                    .to_string(),
            ),
            ..blank_agent("reviewer")
        },
        AgentDefinition {
            system_prompt: Some("You produce factual, compact summaries of session content.".to_string()),
            hidden: true,
            free: true,
            ..blank_agent("summary")
        },
    ]
}

async fn load_custom_agents(dir: PathBuf) -> anyhow::Result<Vec<AgentDefinition>> {
    let mut out = Vec::new();
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
        if ext != "md" {
            continue;
        }
        let raw = fs::read_to_string(&path).await?;
        if let Some(agent) = parse_agent_markdown(&raw, &path) {
            out.push(agent);
        }
    }

    Ok(out)
}

fn parse_agent_markdown(raw: &str, path: &Path) -> Option<AgentDefinition> {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("---") {
        return None;
    }
    let mut parts = trimmed.splitn(3, "---");
    let _ = parts.next();
    let frontmatter = parts.next()?.trim();
    let body = parts.next()?.trim().to_string();
    let parsed: AgentFrontmatter = serde_yaml::from_str(frontmatter).ok()?;
    let default_name = path.file_stem()?.to_string_lossy().to_string();
    let name = parsed.name.unwrap_or(default_name);
    Some(AgentDefinition {
        system_prompt: if body.is_empty() { None } else { Some(body) },
        hidden: parsed.hidden,
        default_model: parsed.default_model,
        preferred_provider: parsed.preferred_provider,
        sandbox_policy: parsed.sandbox_policy.unwrap_or_default(),
        ..blank_agent(&name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_falls_back_to_default_agent_for_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(dir.path()).await.unwrap();
        let agent = registry.get(Some("does-not-exist")).await;
        assert_eq!(agent.name, "general");
    }

    #[tokio::test]
    async fn custom_markdown_agent_overrides_builtin_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let agent_dir = dir.path().join(".gantry").join("agent");
        fs::create_dir_all(&agent_dir).await.unwrap();
        fs::write(
            agent_dir.join("general.md"),
            "---\nhidden: true\n---\nCustom prompt body.",
        )
        .await
        .unwrap();

        let registry = AgentRegistry::new(dir.path()).await.unwrap();
        let agent = registry.get(Some("general")).await;
        assert!(agent.hidden);
        assert_eq!(agent.system_prompt.as_deref(), Some("Custom prompt body."));
    }

    #[tokio::test]
    async fn reload_picks_up_newly_added_custom_agent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(dir.path()).await.unwrap();
        assert!(registry.get(Some("custom")).await.name == "general");

        let agent_dir = dir.path().join(".gantry").join("agent");
        fs::create_dir_all(&agent_dir).await.unwrap();
        fs::write(agent_dir.join("custom.md"), "---\nname: custom\n---\nBody.").await.unwrap();

        registry.reload(dir.path()).await.unwrap();
        let agent = registry.get(Some("custom")).await;
        assert_eq!(agent.name, "custom");
    }
}
