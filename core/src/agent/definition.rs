use crate::traits::Toolset;
use std::sync::Arc;

/// A declared agent: which model to call, how to instruct it and which
/// toolsets it may use. Immutable once built.
pub struct Agent {
    name: String,
    model: String,
    instruction: String,
    description: String,
    toolsets: Vec<Arc<dyn Toolset>>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instruction: instruction.into(),
            description: String::new(),
            toolsets: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_toolset(mut self, toolset: Arc<dyn Toolset>) -> Self {
        self.toolsets.push(toolset);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn toolsets(&self) -> &[Arc<dyn Toolset>] {
        &self.toolsets
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<&str> = self.toolsets.iter().map(|t| t.source()).collect();
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("instruction", &self.instruction)
            .field("toolsets", &sources)
            .finish()
    }
}
