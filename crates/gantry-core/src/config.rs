use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

use gantry_providers::ProviderConfig;

/// Merged application configuration. This is the shape every other
/// component reads off the `ConfigStore` snapshot; it deliberately stays
/// small, mirroring only the settings that cut across components rather
/// than duplicating each crate's own defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_concurrent_children")]
    pub max_concurrent_child_tasks: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,
    #[serde(default = "default_drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_max_concurrent_children() -> usize {
    4
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Rejects configs a reload must not accept: an explicit default
    /// provider that isn't actually configured.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(default_provider) = &self.default_provider {
            if !self.providers.contains_key(default_provider) {
                anyhow::bail!("default_provider '{default_provider}' has no matching providers entry");
            }
        }
        if self.max_concurrent_tasks == 0 {
            anyhow::bail!("max_concurrent_tasks must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    managed: Value,
    env: Value,
    runtime: Value,
    cli: Value,
}

/// Layered configuration store: global file -> project file -> managed
/// file -> environment -> runtime patches -> CLI overrides, deep-merged
/// in that order. A `reload()` call re-reads the file layers and
/// validates the merged result before swapping it in, so a bad reload
/// leaves the previous snapshot in place.
#[derive(Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    global_path: PathBuf,
    managed_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let project_path = path.as_ref().to_path_buf();
        if let Some(parent) = project_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let managed_path = project_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("managed_config.json");
        let global_path = resolve_global_config_path().await?;

        let global = read_json_file(&global_path).await.unwrap_or_else(|_| empty_object());
        let project = read_json_file(&project_path).await.unwrap_or_else(|_| empty_object());
        let managed = read_json_file(&managed_path).await.unwrap_or_else(|_| empty_object());

        let layers = ConfigLayers {
            global,
            project,
            managed,
            env: env_layer(),
            runtime: empty_object(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };

        let store = Self {
            project_path,
            global_path,
            managed_path,
            layers: Arc::new(RwLock::new(layers)),
        };
        store.validate_merged().await?;
        Ok(store)
    }

    /// Re-reads the global and project files from disk, validates the
    /// result against the other layers, and only swaps it in on success.
    /// On failure the previously loaded snapshot is left untouched.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let global = read_json_file(&self.global_path).await?;
        let project = read_json_file(&self.project_path).await?;
        let managed = read_json_file(&self.managed_path).await?;

        let candidate = {
            let current = self.layers.read().await;
            ConfigLayers {
                global,
                project,
                managed,
                env: current.env.clone(),
                runtime: current.runtime.clone(),
                cli: current.cli.clone(),
            }
        };

        let mut merged = empty_object();
        deep_merge(&mut merged, &candidate.global);
        deep_merge(&mut merged, &candidate.project);
        deep_merge(&mut merged, &candidate.managed);
        deep_merge(&mut merged, &candidate.env);
        deep_merge(&mut merged, &candidate.runtime);
        deep_merge(&mut merged, &candidate.cli);
        let app_config: AppConfig = serde_json::from_value(merged)?;
        app_config.validate()?;

        *self.layers.write().await = candidate;
        Ok(())
    }

    async fn validate_merged(&self) -> anyhow::Result<()> {
        self.get().await.validate()
    }

    pub async fn get(&self) -> AppConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.managed);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    pub async fn patch_project(&self, patch: Value) -> anyhow::Result<Value> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.project, &patch);
        }
        self.save_project().await?;
        Ok(self.get_effective_value().await)
    }

    pub async fn patch_runtime(&self, patch: Value) -> anyhow::Result<Value> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.runtime, &patch);
        }
        Ok(self.get_effective_value().await)
    }

    async fn save_project(&self) -> anyhow::Result<()> {
        let snapshot = self.layers.read().await.project.clone();
        write_json_file(&self.project_path, &snapshot).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut to_write = value.clone();
    strip_persisted_secrets(&mut to_write);
    let raw = serde_json::to_string_pretty(&to_write)?;
    fs::write(path, raw).await?;
    Ok(())
}

fn strip_persisted_secrets(value: &mut Value) {
    let Value::Object(root) = value else { return };
    let Some(providers) = root.get_mut("providers").and_then(|v| v.as_object_mut()) else {
        return;
    };
    for (provider_id, provider_cfg) in providers.iter_mut() {
        let Value::Object(cfg) = provider_cfg else { continue };
        if !cfg.contains_key("api_key") {
            continue;
        }
        if provider_has_runtime_secret(provider_id) {
            cfg.remove("api_key");
        }
    }
}

fn provider_has_runtime_secret(provider_id: &str) -> bool {
    provider_env_candidates(provider_id)
        .into_iter()
        .any(|key| std::env::var(&key).map(|v| !v.trim().is_empty()).unwrap_or(false))
}

fn provider_env_candidates(provider_id: &str) -> Vec<String> {
    let normalized = provider_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_ascii_uppercase();

    let mut out = vec![format!("{}_API_KEY", normalized)];
    match provider_id.to_ascii_lowercase().as_str() {
        "openai" => out.push("OPENAI_API_KEY".to_string()),
        "openrouter" => out.push("OPENROUTER_API_KEY".to_string()),
        "anthropic" => out.push("ANTHROPIC_API_KEY".to_string()),
        "groq" => out.push("GROQ_API_KEY".to_string()),
        "mistral" => out.push("MISTRAL_API_KEY".to_string()),
        "together" => out.push("TOGETHER_API_KEY".to_string()),
        _ => {}
    }
    out.sort();
    out.dedup();
    out
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| empty_object()))
}

async fn resolve_global_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("GANTRY_GLOBAL_CONFIG") {
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("gantry").join("config.json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    Ok(PathBuf::from(".gantry/global_config.json"))
}

fn env_layer() -> Value {
    let mut root = empty_object();

    if let Ok(max_concurrent) = std::env::var("GANTRY_MAX_CONCURRENT") {
        if let Ok(n) = max_concurrent.trim().parse::<usize>() {
            deep_merge(&mut root, &json!({ "max_concurrent_tasks": n }));
        }
    }

    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        deep_merge(
            &mut root,
            &json!({ "providers": { "openai": { "api_key": api_key, "url": "https://api.openai.com/v1", "default_model": "gpt-5.2" } } }),
        );
    }
    add_openai_env(&mut root, "openrouter", "OPENROUTER_API_KEY", "https://openrouter.ai/api/v1", "openai/gpt-4o-mini");
    add_openai_env(&mut root, "groq", "GROQ_API_KEY", "https://api.groq.com/openai/v1", "llama-3.1-8b-instant");
    add_openai_env(&mut root, "mistral", "MISTRAL_API_KEY", "https://api.mistral.ai/v1", "mistral-small-latest");
    add_openai_env(&mut root, "together", "TOGETHER_API_KEY", "https://api.together.xyz/v1", "meta-llama/Llama-3.1-8B-Instruct-Turbo");
    if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
        deep_merge(
            &mut root,
            &json!({ "providers": { "anthropic": { "api_key": api_key, "url": "https://api.anthropic.com/v1", "default_model": "claude-sonnet-4-6" } } }),
        );
    }
    if let Ok(ollama_url) = std::env::var("OLLAMA_URL") {
        deep_merge(&mut root, &json!({ "providers": { "ollama": { "url": ollama_url, "default_model": "llama3.1:8b" } } }));
    }

    root
}

fn add_openai_env(root: &mut Value, provider: &str, key_env: &str, default_url: &str, model: &str) {
    if let Ok(api_key) = std::env::var(key_env) {
        deep_merge(
            root,
            &json!({ "providers": { provider: { "api_key": api_key, "url": default_url, "default_model": model } } }),
        );
    }
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_file(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        path.push(format!("gantry-core-config-{name}-{ts}.json"));
        path
    }

    #[test]
    fn validate_rejects_unknown_default_provider() {
        let config = AppConfig {
            default_provider: Some("openai".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_matching_default_provider() {
        let mut providers = HashMap::new();
        providers.insert("openai".to_string(), ProviderConfig::default());
        let config = AppConfig { providers, default_provider: Some("openai".to_string()), ..AppConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn reload_keeps_previous_snapshot_on_validation_failure() {
        let path = unique_temp_file("reload");
        std::env::remove_var("GANTRY_GLOBAL_CONFIG");
        fs::write(&path, serde_json::to_vec(&json!({})).unwrap()).await.unwrap();

        let store = ConfigStore::new(&path, None).await.unwrap();
        fs::write(&path, serde_json::to_vec(&json!({ "default_provider": "missing" })).unwrap())
            .await
            .unwrap();

        let result = store.reload().await;
        assert!(result.is_err());
        let config = store.get().await;
        assert!(config.default_provider.is_none());

        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn patch_project_persists_and_is_visible_in_effective_value() {
        let path = unique_temp_file("patch");
        std::env::remove_var("GANTRY_GLOBAL_CONFIG");
        let store = ConfigStore::new(&path, None).await.unwrap();
        store.patch_project(json!({ "max_concurrent_tasks": 16 })).await.unwrap();

        let config = store.get().await;
        assert_eq!(config.max_concurrent_tasks, 16);

        let _ = fs::remove_file(&path).await;
    }
}
