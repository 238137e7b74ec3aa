use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MCP_SERVER_URL_ENV: &str = "MCP_SERVER_URL";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_AGENT_NAME: &str = "zoo_tour_guide";
pub const DEFAULT_INSTRUCTION: &str =
    "You are a helpful tour guide for a zoo. Use your tools to answer questions about the animals.";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not set.")]
    MissingEnv(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub agent_name: String,
    pub instruction: String,
    pub max_iterations: usize,
    pub temperature: f64,
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub serve_web: bool,
    pub mcp_server_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            max_iterations: 20,
            temperature: 1.0,
            app_name: DEFAULT_AGENT_NAME.to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            serve_web: false,
            mcp_server_url: None,
        }
    }
}

impl Config {
    /// Loads the optional TOML file, then overlays the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => load_config_file(path)?,
            None => Config::default(),
        };
        Ok(base.with_env(|key| std::env::var(key).ok())?)
    }

    /// Overlays values read through `lookup` onto `self`. Empty values count as unset.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(MCP_SERVER_URL_ENV) {
            self.mcp_server_url = Some(url);
        }
        if let Some(provider) = get("ZOO_GUIDE_PROVIDER") {
            self.provider = Some(provider);
        }
        if let Some(model) = get("ZOO_GUIDE_MODEL") {
            self.model = model;
        }
        if let Some(host) = get("ZOO_GUIDE_HOST") {
            self.host = host;
        }
        if let Some(port) = get("PORT") {
            self.port = port.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: "PORT",
                    value: port.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(web) = get("SERVE_WEB_INTERFACE") {
            self.serve_web = parse_flag("SERVE_WEB_INTERFACE", &web)?;
        }

        Ok(self)
    }

    pub fn require_mcp_server_url(&self) -> Result<&str, ConfigError> {
        self.mcp_server_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingEnv(MCP_SERVER_URL_ENV))
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("zoo-guide.toml")
}
