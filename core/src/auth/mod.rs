//! Identity tokens for calling private tool servers.
//!
//! The tool server sits behind an identity-aware front door that verifies a
//! Google-signed OIDC token. The token's audience is the service's root URL,
//! which is the MCP endpoint URL without its `/mcp` path.

pub mod metadata;
pub mod service_account;

pub use metadata::MetadataServerSource;
pub use service_account::{ServiceAccountKey, ServiceAccountSource};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub const AUTHORIZATION: &str = "Authorization";

const MCP_PATH_SUFFIX: &str = "/mcp";

#[async_trait]
pub trait IdTokenSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_id_token(&self, audience: &str) -> Result<String>;
}

/// Root URL of the tool server: the configured URL with one trailing `/mcp` removed.
pub fn audience_for(mcp_server_url: &str) -> String {
    mcp_server_url
        .strip_suffix(MCP_PATH_SUFFIX)
        .unwrap_or(mcp_server_url)
        .to_string()
}

pub async fn auth_headers(
    source: &dyn IdTokenSource,
    mcp_server_url: &str,
) -> Result<HashMap<String, String>> {
    let audience = audience_for(mcp_server_url);
    info!(source = source.name(), %audience, "fetching identity token");

    let token = source
        .fetch_id_token(&audience)
        .await
        .with_context(|| format!("Failed to fetch identity token for audience {}", audience))?;

    if token.trim().is_empty() {
        anyhow::bail!("Identity token for audience {} is empty", audience);
    }

    Ok(HashMap::from([(
        AUTHORIZATION.to_string(),
        format!("Bearer {}", token.trim()),
    )]))
}

/// A fixed token, for local development against an unauthenticated server.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl IdTokenSource for StaticTokenSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_id_token(&self, _audience: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Picks a token source from the environment: `MCP_ID_TOKEN`, then a
/// service-account key named by `GOOGLE_APPLICATION_CREDENTIALS`, then the
/// metadata server.
pub fn default_token_source<F>(lookup: F) -> Result<Arc<dyn IdTokenSource>>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = get("MCP_ID_TOKEN") {
        return Ok(Arc::new(StaticTokenSource::new(token)));
    }

    if let Some(path) = get("GOOGLE_APPLICATION_CREDENTIALS") {
        let key = ServiceAccountKey::from_file(std::path::Path::new(&path))?;
        return Ok(Arc::new(ServiceAccountSource::new(key)));
    }

    let source = match get("GCE_METADATA_HOST") {
        Some(host) => MetadataServerSource::new().with_base_url(format!("http://{}", host)),
        None => MetadataServerSource::new(),
    };
    Ok(Arc::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSource {
        audiences: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IdTokenSource for RecordingSource {
        fn name(&self) -> &str {
            "recording"
        }

        async fn fetch_id_token(&self, audience: &str) -> Result<String> {
            self.audiences.lock().unwrap().push(audience.to_string());
            Ok("signed.jwt.token".to_string())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl IdTokenSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_id_token(&self, _audience: &str) -> Result<String> {
            anyhow::bail!("no ambient credentials")
        }
    }

    #[test]
    fn audience_strips_mcp_suffix() {
        assert_eq!(audience_for("https://host/mcp"), "https://host");
        assert_eq!(
            audience_for("https://zoo-abc-uc.a.run.app/mcp"),
            "https://zoo-abc-uc.a.run.app"
        );
    }

    #[test]
    fn audience_strips_only_one_suffix() {
        assert_eq!(audience_for("https://host/mcp/mcp"), "https://host/mcp");
    }

    #[test]
    fn audience_keeps_other_urls() {
        assert_eq!(audience_for("https://host/mcp/"), "https://host/mcp/");
        assert_eq!(audience_for("https://host"), "https://host");
        assert_eq!(audience_for("https://host/tools"), "https://host/tools");
    }

    #[tokio::test]
    async fn headers_have_single_bearer_entry() {
        let source = RecordingSource::default();
        let headers = auth_headers(&source, "https://example.com/mcp")
            .await
            .unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["Authorization"], "Bearer signed.jwt.token");
        assert_eq!(
            *source.audiences.lock().unwrap(),
            vec!["https://example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn token_failure_propagates() {
        let err = auth_headers(&FailingSource, "https://example.com/mcp")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("https://example.com"));
        assert!(format!("{:#}", err).contains("no ambient credentials"));
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let source = StaticTokenSource::new("  ");
        assert!(auth_headers(&source, "https://example.com/mcp").await.is_err());
    }

    #[test]
    fn explicit_token_wins() {
        let source = default_token_source(|key| match key {
            "MCP_ID_TOKEN" => Some("dev-token".to_string()),
            "GOOGLE_APPLICATION_CREDENTIALS" => Some("/does/not/exist.json".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(source.name(), "static");
    }

    #[test]
    fn falls_back_to_metadata_server() {
        let source = default_token_source(|_| None).unwrap();
        assert_eq!(source.name(), "metadata");
    }

    #[test]
    fn missing_key_file_is_an_error() {
        let result = default_token_source(|key| match key {
            "GOOGLE_APPLICATION_CREDENTIALS" => Some("/does/not/exist.json".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }
}
