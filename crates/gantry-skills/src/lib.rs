use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use gantry_types::{GantryError, GantryResult};

/// Metadata for a discovered skill, parsed from a `SKILL.md` frontmatter
/// block. A skill is an opaque external collaborator from the Workflow
/// Engine's point of view: the engine knows its name and description, not
/// its internals.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
    pub requires: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: String,
    description: String,
    #[serde(default)]
    requires: Vec<String>,
}

fn parse_frontmatter(content: &str) -> Option<SkillFrontmatter> {
    let body = content.strip_prefix("---")?;
    let end = body.find("---")?;
    serde_yaml::from_str(&body[..end]).ok()
}

/// Discovers skills from a directory of `<name>/SKILL.md` subfolders.
/// Mirrors the teacher's frontmatter-in-markdown discovery convention
/// without the import/export tooling a coding assistant needs.
pub struct SkillRegistry {
    root: PathBuf,
    skills: HashMap<String, SkillInfo>,
}

impl SkillRegistry {
    pub fn load(root: impl Into<PathBuf>) -> GantryResult<Self> {
        let root = root.into();
        let mut skills = HashMap::new();
        if root.is_dir() {
            for entry in fs::read_dir(&root)
                .map_err(|e| GantryError::Internal(format!("reading skills dir: {e}")))?
                .flatten()
            {
                let skill_file = entry.path().join("SKILL.md");
                if !skill_file.is_file() {
                    continue;
                }
                let Ok(content) = fs::read_to_string(&skill_file) else {
                    continue;
                };
                let Some(frontmatter) = parse_frontmatter(&content) else {
                    tracing::warn!(path = %skill_file.display(), "skill missing valid frontmatter, skipping");
                    continue;
                };
                skills.insert(
                    frontmatter.name.clone(),
                    SkillInfo {
                        name: frontmatter.name,
                        description: frontmatter.description,
                        path: skill_file,
                        requires: frontmatter.requires,
                    },
                );
            }
        }
        Ok(Self { root, skills })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&SkillInfo> {
        self.skills.get(name)
    }

    pub fn list(&self) -> Vec<&SkillInfo> {
        let mut out: Vec<&SkillInfo> = self.skills.values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// External collaborator seam the Workflow Engine's `skill` step calls
/// into. A concrete invoker (e.g. one that re-dispatches through §4.E with
/// the skill's bound prompt) is supplied by the caller; this crate only
/// owns discovery and the atomic contract.
#[async_trait]
pub trait SkillInvoker: Send + Sync {
    async fn invoke(&self, skill: &str, input: serde_json::Value) -> GantryResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn discovers_skill_with_valid_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("summarize");
        fs::create_dir(&skill_dir).unwrap();
        let mut file = fs::File::create(skill_dir.join("SKILL.md")).unwrap();
        write!(
            file,
            "---\nname: summarize\ndescription: Summarize text\n---\nBody."
        )
        .unwrap();

        let registry = SkillRegistry::load(dir.path()).unwrap();
        let skill = registry.get("summarize").unwrap();
        assert_eq!(skill.description, "Summarize text");
    }

    #[test]
    fn skips_directories_without_a_skill_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("not_a_skill")).unwrap();
        let registry = SkillRegistry::load(dir.path()).unwrap();
        assert!(registry.list().is_empty());
    }
}
