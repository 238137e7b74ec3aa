pub mod agent;
pub mod auth;
pub mod config;
pub mod guide;
pub mod mcp;
pub mod providers;
pub mod server;
pub mod traits;

pub use agent::{Agent, AgentLoop, Runner, SessionStore, ToolRegistry};
pub use auth::{IdTokenSource, audience_for, auth_headers, default_token_source};
pub use config::{Config, ConfigError};
pub use guide::{build_root_agent, build_runner, zoo_toolset};
pub use mcp::{McpToolset, StreamableHttpConnectionParams};
pub use providers::*;
pub use server::{AppOptions, build_app};
pub use traits::*;
