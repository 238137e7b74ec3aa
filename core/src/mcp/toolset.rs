use crate::mcp::params::StreamableHttpConnectionParams;
use crate::traits::{Tool, ToolResult, Toolset};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, CallToolResult, ClientInfo, Implementation},
    service::{Peer, RunningService, ServiceError},
    transport::{
        StreamableHttpClientTransport, streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type McpClient = RunningService<RoleClient, ClientInfo>;

struct Connection {
    generation: u64,
    client: McpClient,
}

/// A lazily connected client session with one MCP server.
///
/// A session the server no longer knows about (restart, idle expiry, an
/// explicit close) is replaced by a fresh one and the request is retried once.
pub struct McpSession {
    params: StreamableHttpConnectionParams,
    connection: Mutex<Option<Connection>>,
    generations: AtomicU64,
}

impl McpSession {
    pub fn new(params: StreamableHttpConnectionParams) -> Self {
        Self {
            params,
            connection: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &StreamableHttpConnectionParams {
        &self.params
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn peer(&self) -> Result<(u64, Peer<RoleClient>)> {
        let mut connection = self.connection.lock().await;
        if let Some(conn) = connection.as_ref() {
            return Ok((conn.generation, conn.client.peer().clone()));
        }

        let transport = StreamableHttpClientTransport::with_client(
            self.params.http_client()?,
            StreamableHttpClientTransportConfig::with_uri(self.params.url.as_str()),
        );
        let client = tokio::time::timeout(self.params.timeout, Self::client_info().serve(transport))
            .await
            .map_err(|_| {
                anyhow!(
                    "MCP session setup with {} timed out after {:?}",
                    self.params.url,
                    self.params.timeout
                )
            })?
            .with_context(|| format!("Failed to initialize MCP session with {}", self.params.url))?;

        if let Some(server) = client.peer_info() {
            info!(
                url = %self.params.url,
                server = %server.server_info.name,
                protocol = ?server.protocol_version,
                "MCP session initialized"
            );
        }

        let generation = self
            .generations
            .fetch_add(1, Ordering::Relaxed);
        let peer = client.peer().clone();
        *connection = Some(Connection { generation, client });
        Ok((generation, peer))
    }

    /// Drops the connection if it is still the one that failed.
    async fn reset(&self, generation: u64) {
        let mut connection = self.connection.lock().await;
        if connection
            .as_ref()
            .is_some_and(|conn| conn.generation == generation)
        {
            *connection = None;
        }
    }

    async fn request<T, F, Fut>(&self, what: &str, limit: Duration, op: F) -> Result<T>
    where
        F: Fn(Peer<RoleClient>) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let (generation, peer) = self.peer().await?;
        match tokio::time::timeout(limit, op(peer)).await {
            Err(_) => return Err(self.timed_out(what, limit)),
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !is_session_lost(&e) => {
                return Err(anyhow::Error::new(e).context(what.to_string()));
            }
            Ok(Err(e)) => {
                warn!(url = %self.params.url, error = %e, "MCP session lost, reconnecting");
                self.reset(generation).await;
            }
        }

        let (_, peer) = self.peer().await?;
        match tokio::time::timeout(limit, op(peer)).await {
            Err(_) => Err(self.timed_out(what, limit)),
            Ok(result) => result.with_context(|| what.to_string()),
        }
    }

    fn timed_out(&self, what: &str, limit: Duration) -> anyhow::Error {
        anyhow!("{} on {} timed out after {:?}", what, self.params.url, limit)
    }

    pub async fn list_tools(&self) -> Result<Vec<rmcp::model::Tool>> {
        self.request("MCP tools/list", self.params.timeout, |peer| async move {
            peer.list_all_tools().await
        })
        .await
    }

    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult> {
        debug!(tool = name, "MCP tools/call");
        self.request("MCP tools/call", self.params.sse_read_timeout, |peer| {
            let request = CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments.clone()),
            };
            async move { peer.call_tool(request).await }
        })
        .await
    }

    /// Ends the session. The next request opens a new one.
    pub async fn close(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(conn) = connection
            && let Err(e) = conn.client.cancel().await
        {
            warn!(url = %self.params.url, error = %e, "failed to close MCP session");
        }
    }
}

/// Errors that mean the transport or server-side session is gone, as
/// opposed to the server answering with a JSON-RPC error.
fn is_session_lost(error: &ServiceError) -> bool {
    !matches!(error, ServiceError::McpError(_))
}

/// Tools served by a remote MCP server over streamable HTTP.
///
/// Construction performs no I/O; the server is first contacted when the
/// agent resolves its tools.
pub struct McpToolset {
    session: Arc<McpSession>,
    tool_filter: Option<Vec<String>>,
}

impl McpToolset {
    pub fn new(params: StreamableHttpConnectionParams) -> Self {
        Self {
            session: Arc::new(McpSession::new(params)),
            tool_filter: None,
        }
    }

    pub fn with_tool_filter(mut self, names: Vec<String>) -> Self {
        self.tool_filter = Some(names);
        self
    }

    pub fn connection_params(&self) -> &StreamableHttpConnectionParams {
        self.session.params()
    }

    pub fn session(&self) -> &Arc<McpSession> {
        &self.session
    }

    fn is_selected(&self, name: &str) -> bool {
        self.tool_filter
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name))
    }
}

#[async_trait]
impl Toolset for McpToolset {
    fn source(&self) -> &str {
        &self.connection_params().url
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let infos = self
            .session
            .list_tools()
            .await
            .with_context(|| format!("Failed to list tools from {}", self.source()))?;

        Ok(infos
            .into_iter()
            .filter(|info| self.is_selected(&info.name))
            .map(|info| Arc::new(McpTool::new(info, self.session.clone())) as Arc<dyn Tool>)
            .collect())
    }

    async fn close(&self) {
        self.session.close().await;
    }
}

pub struct McpTool {
    name: String,
    description: String,
    input_schema: Value,
    session: Arc<McpSession>,
}

impl McpTool {
    pub fn new(info: rmcp::model::Tool, session: Arc<McpSession>) -> Self {
        Self {
            name: info.name.to_string(),
            description: info
                .description
                .as_deref()
                .map(str::to_string)
                .unwrap_or_default(),
            input_schema: Value::Object(info.input_schema.as_ref().clone()),
            session,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let arguments = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Ok(ToolResult::error(format!(
                    "Arguments for {} must be a JSON object, got {}",
                    self.name, other
                )));
            }
        };
        let result = self.session.call_tool(&self.name, arguments).await?;
        Ok(to_tool_result(result))
    }
}

fn to_tool_result(result: CallToolResult) -> ToolResult {
    let texts: Vec<&str> = result
        .content
        .iter()
        .filter_map(|c| c.as_text())
        .map(|t| t.text.as_str())
        .collect();

    let output = if texts.is_empty() {
        result
            .structured_content
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default()
    } else {
        texts.join("\n")
    };

    if result.is_error.unwrap_or(false) {
        ToolResult::error(output)
    } else {
        ToolResult::success(output)
    }
}
