//! Client configuration

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `AUTHFETCH__BASE_URL`
pub const ENV_PREFIX: &str = "AUTHFETCH";

/// Authenticated client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL that relative endpoints are resolved against
    pub base_url: String,

    /// Login endpoint path or absolute URL
    pub login_path: String,

    /// Refresh endpoint path or absolute URL
    pub refresh_path: String,

    /// Lifetime requested for issued tokens, in minutes
    pub expires_in_mins: u32,

    /// Per-request timeout in seconds (0 disables it)
    pub timeout_secs: u64,

    /// Storage key holding the serialized credentials
    pub storage_key: String,

    /// Location of the file-backed credential store
    pub storage_path: PathBuf,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dummyjson.com".to_string(),
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            expires_in_mins: 30,
            timeout_secs: 30,
            storage_key: "login_info".to_string(),
            storage_path: default_data_dir().join("storage.json"),
            user_agent: concat!("authfetch-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from file, with environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = Self::with_defaults()?
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration with defaults and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables cannot be parsed
    pub fn from_env() -> Result<Self> {
        let settings = Self::with_defaults()?
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn with_defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = Self::default();

        Ok(config::Config::builder()
            .set_default("base_url", defaults.base_url)?
            .set_default("login_path", defaults.login_path)?
            .set_default("refresh_path", defaults.refresh_path)?
            .set_default("expires_in_mins", u64::from(defaults.expires_in_mins))?
            .set_default("timeout_secs", defaults.timeout_secs)?
            .set_default("storage_key", defaults.storage_key)?
            .set_default(
                "storage_path",
                defaults.storage_path.to_string_lossy().to_string(),
            )?
            .set_default("user_agent", defaults.user_agent)?)
    }

    /// Request timeout, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Parsed base URL
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL is not an absolute URL
    pub fn base(&self) -> Result<url::Url> {
        url::Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| ClientError::Configuration(format!("invalid base_url: {e}")))
    }

    /// Resolve an endpoint: paths starting with `/` are appended to the base URL,
    /// anything else must be an absolute URL
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the result is not a valid URL
    pub fn resolve(&self, endpoint: &str) -> Result<url::Url> {
        let raw = if endpoint.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
        } else {
            endpoint.to_string()
        };
        url::Url::parse(&raw)
            .map_err(|e| ClientError::Configuration(format!("invalid endpoint {raw}: {e}")))
    }
}

/// Default directory for state files
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AUTHFETCH_STATE_DIR") {
        PathBuf::from(dir)
    } else {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("authfetch")
    }
}
