//! Model Context Protocol client over the streamable HTTP transport.

mod params;
mod toolset;

pub use params::StreamableHttpConnectionParams;
pub use toolset::{McpSession, McpTool, McpToolset};
