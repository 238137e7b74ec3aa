pub mod provider;
pub mod tool;

pub use provider::{ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall};
pub use tool::{Tool, ToolResult, ToolSpec, Toolset};
