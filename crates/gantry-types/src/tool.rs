use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool declaration surfaced to providers as part of the chat request and
/// to the HTTP API's `/tools` listing. `input_schema` is plain JSON Schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: String,
    #[serde(default)]
    pub metadata: Value,
}
