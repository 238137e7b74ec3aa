use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::time::Duration;

/// How to reach a streamable HTTP MCP server.
#[derive(Clone)]
pub struct StreamableHttpConnectionParams {
    pub url: String,
    /// Sent on every request, e.g. `Authorization`.
    pub headers: HashMap<String, String>,
    /// Connect timeout, and the limit for session setup and `tools/list`.
    pub timeout: Duration,
    /// Limit for a `tools/call`, whose reply may stream.
    pub sse_read_timeout: Duration,
}

impl StreamableHttpConnectionParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(5),
            sse_read_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sse_read_timeout(mut self, timeout: Duration) -> Self {
        self.sse_read_timeout = timeout;
        self
    }

    /// HTTP client that carries the static headers on every request.
    ///
    /// No overall request timeout is set: the same client holds the
    /// long-lived event stream.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let mut value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.timeout)
            .build()
            .context("Failed to build MCP HTTP client")
    }
}

impl std::fmt::Debug for StreamableHttpConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut header_names: Vec<&String> = self.headers.keys().collect();
        header_names.sort();
        f.debug_struct("StreamableHttpConnectionParams")
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("timeout", &self.timeout)
            .field("sse_read_timeout", &self.sse_read_timeout)
            .finish()
    }
}
