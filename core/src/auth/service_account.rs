use crate::auth::IdTokenSource;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use serde::Deserialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials from {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid credentials file {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(content)?;
        if key.key_type != "service_account" {
            anyhow::bail!(
                "Credentials of type '{}' cannot mint identity tokens; a service account key is required",
                key.key_type
            );
        }
        Ok(key)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Exchanges a self-signed JWT for a Google-signed identity token.
pub struct ServiceAccountSource {
    client: reqwest::Client,
    key: ServiceAccountKey,
}

impl ServiceAccountSource {
    pub fn new(key: ServiceAccountKey) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self { client, key }
    }

    fn claims(&self, audience: &str, now_secs: u64) -> serde_json::Value {
        serde_json::json!({
            "iss": self.key.client_email,
            "sub": self.key.client_email,
            "aud": self.key.token_uri,
            "iat": now_secs,
            "exp": now_secs + ASSERTION_LIFETIME_SECS,
            "target_audience": audience,
        })
    }

    fn signed_assertion(&self, audience: &str) -> Result<String> {
        let now_secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let mut header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
        if let Some(kid) = &self.key.private_key_id {
            header["kid"] = serde_json::Value::String(kid.clone());
        }

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.claims(audience, now_secs))?);
        let signing_input = format!("{header_b64}.{claims_b64}");

        let der = pem_to_der(&self.key.private_key)?;
        let key_pair = RsaKeyPair::from_pkcs8(&der)
            .map_err(|e| anyhow!("Invalid service account private key: {}", e))?;

        let mut signature = vec![0; key_pair.public().modulus_len()];
        key_pair
            .sign(
                &RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|_| anyhow!("Failed to sign identity token assertion"))?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

#[async_trait]
impl IdTokenSource for ServiceAccountSource {
    fn name(&self) -> &str {
        "service_account"
    }

    async fn fetch_id_token(&self, audience: &str) -> Result<String> {
        let assertion = self.signed_assertion(audience)?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .with_context(|| format!("Token endpoint {} is unreachable", self.key.token_uri))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Token endpoint error {}: {}", status, error_text));
        }

        let body: TokenResponse = response.json().await?;
        body.id_token
            .ok_or_else(|| anyhow!("Token endpoint response has no id_token"))
    }
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();

    if body.is_empty() {
        anyhow::bail!("Service account private key is empty");
    }

    STANDARD
        .decode(body)
        .context("Service account private key is not valid PEM")
}
