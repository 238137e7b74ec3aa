use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// JSON object handed back to the model as the function response.
    pub fn to_response(&self) -> serde_json::Value {
        match &self.error {
            Some(error) => serde_json::json!({ "error": error }),
            None => serde_json::json!({ "result": self.output }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// A group of tools that is resolved lazily, typically from a remote server.
#[async_trait]
pub trait Toolset: Send + Sync {
    /// Where the tools come from, e.g. the endpoint URL.
    fn source(&self) -> &str;

    async fn tools(&self) -> anyhow::Result<Vec<Arc<dyn Tool>>>;

    async fn close(&self) {}
}
