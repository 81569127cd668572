use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicy {
    Allow,
    Deny,
    RequireApproval,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPolicy {
    Required,
    Optional,
    Never,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        SandboxPolicy::Never
    }
}

/// Named configuration bundle that personifies how a task is executed.
/// Mutable only via config reload; readers obtain a snapshot at task start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    #[serde(default)]
    pub fallback_providers: Vec<String>,
    #[serde(default)]
    pub allowed_directories: Vec<PathBuf>,
    #[serde(default)]
    pub permission_mode: Option<crate::PermissionMode>,
    #[serde(default)]
    pub tool_policy: HashMap<String, ToolPolicy>,
    #[serde(default)]
    pub sandbox_policy: SandboxPolicy,
    #[serde(default)]
    pub sandbox_image: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    /// The agent may be dispatched free of budget accounting (used for
    /// internal system agents like compaction/title generation).
    #[serde(default)]
    pub free: bool,
}

impl AgentDefinition {
    pub fn tool_policy_for(&self, tool: &str) -> ToolPolicy {
        self.tool_policy
            .get(tool)
            .copied()
            .unwrap_or(ToolPolicy::Allow)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentFrontmatter {
    pub name: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    #[serde(default)]
    pub sandbox_policy: Option<SandboxPolicy>,
}
