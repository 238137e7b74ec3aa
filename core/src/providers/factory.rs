use crate::config::Config;
use crate::providers::{GeminiProvider, OpenAIProvider};
use crate::traits::Provider;
use anyhow::{Result, anyhow};
use std::sync::Arc;

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    create_provider_with(config, |key| std::env::var(key).ok())
}

pub fn create_provider_with<F>(config: &Config, lookup: F) -> Result<Arc<dyn Provider>>
where
    F: Fn(&str) -> Option<String>,
{
    let provider_name = config.provider.as_deref().unwrap_or("gemini");

    match provider_name.to_lowercase().as_str() {
        "gemini" | "google" => {
            let api_key = resolve_api_key_with_fallback(
                &lookup,
                &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
                &config.api_key,
            )?;
            let mut provider = GeminiProvider::new(api_key);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let api_key =
                resolve_api_key_with_fallback(&lookup, &["OPENAI_API_KEY"], &config.api_key)?;
            let mut provider = OpenAIProvider::new(api_key);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        _ => Err(anyhow!(
            "Unknown provider: {}. Available: gemini, openai",
            provider_name
        )),
    }
}

fn resolve_api_key_with_fallback<F>(lookup: &F, env_vars: &[&str], config_key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    for var_name in env_vars {
        if let Some(key) = lookup(var_name).filter(|k| !k.trim().is_empty()) {
            return Ok(key);
        }
    }
    if !config_key.is_empty() {
        Ok(config_key.to_string())
    } else {
        Err(anyhow!(
            "No API key found. Set one of {} or api_key in the config file",
            env_vars.join(", ")
        ))
    }
}
