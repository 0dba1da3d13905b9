//! CLI configuration utilities

use anyhow::{Context, Result};
use authfetch_client::ClientConfig;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Resolve the client configuration for a command
///
/// An explicit `--config` file wins, then `<data-dir>/config.json` if it
/// exists, then defaults with environment overrides. Credentials live in
/// `<data-dir>/storage.json` unless the file sets another location.
pub fn load_client_config(data_dir: &Path, explicit: Option<PathBuf>) -> Result<ClientConfig> {
    let default_path = data_dir.join(CONFIG_FILE);
    let path = explicit.or_else(|| default_path.exists().then_some(default_path));

    match path {
        Some(path) => ClientConfig::from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => {
            let mut config = ClientConfig::from_env()?;
            if std::env::var(format!("{}__STORAGE_PATH", authfetch_client::config::ENV_PREFIX))
                .is_err()
            {
                config.storage_path = data_dir.join("storage.json");
            }
            Ok(config)
        }
    }
}

/// Save client configuration to JSON file
pub fn save_client_config<P: AsRef<Path>>(config: &ClientConfig, path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default configuration file storing credentials under `data_dir`
pub fn generate_default_config<P: AsRef<Path>>(path: P, data_dir: &Path) -> Result<ClientConfig> {
    let config = ClientConfig {
        storage_path: data_dir.join("storage.json"),
        ..ClientConfig::default()
    };
    save_client_config(&config, path)?;
    Ok(config)
}
