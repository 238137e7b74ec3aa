use crate::auth::IdTokenSource;
use anyhow::{Context, Result};
use async_trait::async_trait;

const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal";
const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Mints identity tokens for the runtime's attached service account through
/// the compute metadata server.
pub struct MetadataServerSource {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataServerSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: DEFAULT_METADATA_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

impl Default for MetadataServerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdTokenSource for MetadataServerSource {
    fn name(&self) -> &str {
        "metadata"
    }

    async fn fetch_id_token(&self, audience: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, IDENTITY_PATH))
            .query(&[("audience", audience), ("format", "full")])
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .with_context(|| {
                format!(
                    "Metadata server at {} is unreachable; no ambient credentials available",
                    self.base_url
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Metadata server error {}: {}",
                status,
                error_text
            ));
        }

        let token = response.text().await?;
        Ok(token.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, extract::Query, http::HeaderMap, http::StatusCode, routing::get};
    use std::collections::HashMap;

    async fn identity(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, String) {
        if headers.get("Metadata-Flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
            return (StatusCode::FORBIDDEN, "missing Metadata-Flavor".to_string());
        }
        let audience = params.get("audience").cloned().unwrap_or_default();
        let format = params.get("format").cloned().unwrap_or_default();
        (StatusCode::OK, format!("token-for:{}:{}\n", audience, format))
    }

    async fn spawn_metadata_server() -> String {
        let app = Router::new().route(IDENTITY_PATH, get(identity));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn fetches_token_for_audience() {
        let base = spawn_metadata_server().await;
        let source = MetadataServerSource::new().with_base_url(base);

        let token = source.fetch_id_token("https://example.com").await.unwrap();
        assert_eq!(token, "token-for:https://example.com:full");
    }

    #[tokio::test]
    async fn unreachable_server_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = MetadataServerSource::new().with_base_url(format!("http://{}", addr));
        let err = source.fetch_id_token("https://example.com").await.unwrap_err();
        assert!(err.to_string().contains("no ambient credentials"));
    }
}
