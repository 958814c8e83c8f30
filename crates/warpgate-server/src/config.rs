use serde::{Deserialize, Serialize};
use std::path::Path;
use warpgate_observability::LoggingConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream chat service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Comma-separated egress proxy URLs
    #[serde(default)]
    pub proxies: String,

    /// Comma-separated container names, paired with `proxies` by position
    #[serde(default)]
    pub containers: String,

    /// Registered accounts instead of anonymous sessions
    #[serde(default)]
    pub use_auth: bool,

    /// Seconds a restarted egress route is given before it is considered live
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,

    /// Upstream request timeout in seconds
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            proxies: String::new(),
            containers: String::new(),
            use_auth: false,
            warmup_secs: default_warmup_secs(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence).
    /// Empty variables count as unset.
    pub fn merge_env(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = env("BASE_URL") {
            self.base_url = val;
        }

        if let Some(val) = env("WARP_PROXIES") {
            self.proxies = val;
        }

        if let Some(val) = env("WARP_CONTAINERS") {
            self.containers = val;
        }

        if let Some(val) = env("PORT") {
            self.port = val.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: val.clone(),
            })?;
        }

        if let Some(val) = env("HOST") {
            self.host = val;
        }

        if let Some(val) = env("DEBUG") {
            self.logging.debug = is_enabled(&val);
        }

        if let Some(val) = env("USE_AUTH") {
            self.use_auth = is_enabled(&val);
        }

        if let Some(val) = env("LOG_FORMAT") {
            self.logging.format = val.parse().map_err(|_| ConfigError::InvalidValue {
                key: "LOG_FORMAT",
                value: val.clone(),
            })?;
        }

        Ok(())
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Boolean switches accept `true` or `1`; anything else is off
fn is_enabled(value: &str) -> bool {
    value == "true" || value == "1"
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_url() -> String {
    "https://demo.chat-sdk.dev".to_string()
}

fn default_warmup_secs() -> u64 {
    15
}

fn default_upstream_timeout_secs() -> u64 {
    60
}
