//! Streamable HTTP MCP server exposing zoo animal details at `/mcp`.

pub mod zoo;

use axum::Router;
use rmcp::{
    ServerHandler,
    handler::server::{
        router::tool::ToolRouter,
        wrapper::{Json, Parameters},
    },
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::streamable_http_server::{
        StreamableHttpService, session::local::LocalSessionManager,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use zoo::{AnimalLookup, GetAnimalDetailsRequest};

pub const INSTRUCTIONS: &str = "A server for getting animal details.";

/// Sessions with no traffic for this long are dropped.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct ZooServer {
    tool_router: ToolRouter<Self>,
}

impl Default for ZooServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_router]
impl ZooServer {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get details about an animal")]
    fn get_animal_details(
        &self,
        Parameters(GetAnimalDetailsRequest { animal_name }): Parameters<GetAnimalDetailsRequest>,
    ) -> Json<AnimalLookup> {
        info!(animal = %animal_name, "get_animal_details");
        Json(zoo::lookup(&animal_name))
    }
}

#[tool_handler]
impl ServerHandler for ZooServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub fn session_manager(idle_timeout: Duration) -> LocalSessionManager {
    let mut manager = LocalSessionManager::default();
    manager.session_config.keep_alive = Some(idle_timeout);
    manager
}

pub fn router(sessions: Arc<LocalSessionManager>) -> Router {
    let service = StreamableHttpService::new(
        || Ok(ZooServer::new()),
        sessions,
        Default::default(),
    );
    Router::new().nest_service("/mcp", service)
}
