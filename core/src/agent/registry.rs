use crate::traits::{Tool, ToolResult, ToolSpec, Toolset};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub struct ToolRegistry {
    tools: Mutex<Vec<Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(Vec::new()),
        }
    }

    /// Resolves every toolset; the first failing toolset fails the whole call.
    pub async fn from_toolsets(toolsets: &[Arc<dyn Toolset>]) -> Result<Self> {
        let registry = Self::new();
        for toolset in toolsets {
            for tool in toolset.tools().await? {
                registry.register(tool);
            }
        }
        Ok(registry)
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        if tools.iter().any(|t| t.name() == tool.name()) {
            warn!(tool = tool.name(), "duplicate tool name, keeping the first");
            return;
        }
        tools.push(tool);
    }

    pub fn len(&self) -> usize {
        self.tools.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools.iter().map(|t| t.spec()).collect()
    }

    pub async fn execute(&self, name: &str, args: serde_json::Value) -> ToolResult {
        let tool = {
            let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
            tools.iter().find(|t| t.name() == name).cloned()
        };

        match tool {
            Some(tool) => {
                let result = tool.execute(args).await;
                match result {
                    Ok(result) => result,
                    Err(e) => ToolResult::error(format!("Execution failed: {}", e)),
                }
            }
            None => ToolResult::error(format!("Tool '{}' not found", name)),
        }
    }
}
