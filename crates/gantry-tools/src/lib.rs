use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use gantry_types::{ToolResult, ToolSchema};

/// A named, schema-described unit of work a workflow's `tool_call` step can
/// invoke synchronously. Distinct from a `skill`, which is treated as an
/// opaque external collaborator.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult>;
    async fn execute_with_cancel(
        &self,
        args: Value,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        self.execute(args).await
    }
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    /// Starts with the ambient tool set every deployment gets for free;
    /// operators register more via `register`.
    pub fn new() -> Self {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        map.insert("http_fetch".to_string(), Arc::new(HttpFetchTool::default()));
        map.insert("noop".to_string(), Arc::new(NoopTool));
        Self {
            tools: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn register(&self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.write().await.insert(name.into(), tool);
    }

    pub async fn list(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> =
            self.tools.read().await.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<ToolResult> {
        self.execute_with_cancel(name, args, CancellationToken::new()).await
    }

    pub async fn execute_with_cancel(
        &self,
        name: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        let tool = self.tools.read().await.get(name).cloned();
        match tool {
            Some(tool) => tool.execute_with_cancel(args, cancel).await,
            None => Ok(ToolResult {
                output: format!("unknown tool: {name}"),
                metadata: json!({"error": "tool_not_found"}),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSchemaValidationError {
    pub tool_name: String,
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ToolSchemaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid tool schema `{}` at `{}`: {}",
            self.tool_name, self.path, self.reason
        )
    }
}

impl std::error::Error for ToolSchemaValidationError {}

/// Walks a JSON-Schema-shaped `input_schema`, rejecting the one malformed
/// shape providers reliably choke on: an `array` without `items`.
pub fn validate_tool_schemas(schemas: &[ToolSchema]) -> Result<(), ToolSchemaValidationError> {
    for schema in schemas {
        validate_schema_node(&schema.name, "$", &schema.input_schema)?;
    }
    Ok(())
}

fn validate_schema_node(
    tool_name: &str,
    path: &str,
    value: &Value,
) -> Result<(), ToolSchemaValidationError> {
    let Some(obj) = value.as_object() else {
        if let Some(arr) = value.as_array() {
            for (idx, item) in arr.iter().enumerate() {
                validate_schema_node(tool_name, &format!("{path}[{idx}]"), item)?;
            }
        }
        return Ok(());
    };

    if obj.get("type").and_then(|t| t.as_str()) == Some("array") && !obj.contains_key("items") {
        return Err(ToolSchemaValidationError {
            tool_name: tool_name.to_string(),
            path: path.to_string(),
            reason: "array schema missing items".to_string(),
        });
    }

    if let Some(items) = obj.get("items") {
        validate_schema_node(tool_name, &format!("{path}.items"), items)?;
    }
    if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
        for (key, child) in props {
            validate_schema_node(tool_name, &format!("{path}.properties.{key}"), child)?;
        }
    }
    if let Some(one_of) = obj.get("oneOf").and_then(|v| v.as_array()) {
        for (idx, child) in one_of.iter().enumerate() {
            validate_schema_node(tool_name, &format!("{path}.oneOf[{idx}]"), child)?;
        }
    }
    if let Some(any_of) = obj.get("anyOf").and_then(|v| v.as_array()) {
        for (idx, child) in any_of.iter().enumerate() {
            validate_schema_node(tool_name, &format!("{path}.anyOf[{idx}]"), child)?;
        }
    }
    if let Some(all_of) = obj.get("allOf").and_then(|v| v.as_array()) {
        for (idx, child) in all_of.iter().enumerate() {
            validate_schema_node(tool_name, &format!("{path}.allOf[{idx}]"), child)?;
        }
    }

    Ok(())
}

/// Fetches a URL and returns the body truncated to a sane size; the one
/// tool generic enough to ship with every deployment regardless of what
/// the operator's agents actually do.
pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "http_fetch".to_string(),
            description: "Fetch a URL over HTTP(S) and return the response body".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"],
            }),
        }
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing `url` argument"))?;
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        const MAX_BODY: usize = 64 * 1024;
        let truncated = body.chars().take(MAX_BODY).collect::<String>();
        Ok(ToolResult {
            output: truncated,
            metadata: json!({"status": status, "url": url}),
        })
    }
}

/// Reference tool used by tests and `dry-run` fixtures; echoes its input.
pub struct NoopTool;

#[async_trait]
impl Tool for NoopTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "noop".to_string(),
            description: "Returns its input unchanged".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult {
            output: args.to_string(),
            metadata: json!({}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_lists_sorted_builtin_schemas() {
        let registry = ToolRegistry::new();
        let names: Vec<String> = registry.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["http_fetch".to_string(), "noop".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_reports_not_found_without_erroring() {
        let registry = ToolRegistry::new();
        let result = registry.execute("does_not_exist", json!({})).await.unwrap();
        assert!(result.output.contains("unknown tool"));
    }

    #[tokio::test]
    async fn noop_echoes_input() {
        let registry = ToolRegistry::new();
        let result = registry.execute("noop", json!({"a": 1})).await.unwrap();
        assert_eq!(result.output, json!({"a": 1}).to_string());
    }

    #[test]
    fn array_schema_without_items_is_rejected() {
        let schema = ToolSchema {
            name: "bad".to_string(),
            description: String::new(),
            input_schema: json!({"type": "array"}),
        };
        assert!(validate_tool_schemas(&[schema]).is_err());
    }
}
