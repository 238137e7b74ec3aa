//! The zoo tour guide: one agent backed by one remote MCP toolset.

use crate::agent::{Agent, AgentLoop, Runner};
use crate::auth::{IdTokenSource, auth_headers};
use crate::config::Config;
use crate::mcp::{McpToolset, StreamableHttpConnectionParams};
use crate::traits::Provider;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Authenticated toolset for the configured MCP server. The configuration is
/// checked before any token is requested.
pub async fn zoo_toolset(config: &Config, tokens: &dyn IdTokenSource) -> Result<McpToolset> {
    let url = config.require_mcp_server_url()?;
    let headers = auth_headers(tokens, url).await?;

    Ok(McpToolset::new(
        StreamableHttpConnectionParams::new(url).with_headers(headers),
    ))
}

pub async fn build_root_agent(config: &Config, tokens: &dyn IdTokenSource) -> Result<Agent> {
    let toolset = zoo_toolset(config, tokens).await?;
    info!(url = %toolset.connection_params().url, "registered MCP toolset");

    Ok(
        Agent::new(&config.agent_name, &config.model, &config.instruction)
            .with_toolset(Arc::new(toolset)),
    )
}

pub fn build_runner(config: &Config, agent: Agent, provider: Arc<dyn Provider>) -> Runner {
    let agent_loop = AgentLoop::new(provider, Arc::new(agent))
        .with_max_iterations(config.max_iterations)
        .with_temperature(config.temperature);
    Runner::new(&config.app_name, agent_loop)
}
