//! CLI commands

use anyhow::{Result, anyhow};
use authfetch_client::{
    AuthClient, ClientError, CredentialMode, Method, ProductQuery, RequestDescriptor,
};
use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the issued credentials
    Login {
        /// Account username
        #[arg(short, long)]
        username: String,

        /// Account password
        #[arg(short, long, env = "AUTHFETCH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show whether stored credentials exist
    Status,

    /// Show the logged-in user's profile
    Me,

    /// List one page of products
    Products {
        /// Zero-based page number
        #[arg(long, default_value = "0")]
        page: u32,

        /// Products per page
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Send an authenticated request to an arbitrary endpoint
    Fetch {
        /// Path relative to the base URL (starting with `/`) or an absolute URL
        endpoint: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,

        /// Request body, sent as JSON
        #[arg(long)]
        body: Option<String>,

        /// Extra header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Cookie policy: omit, same-origin or include
        #[arg(long, default_value = "same-origin")]
        credentials: CredentialMode,
    },

    /// Forget stored credentials and cookies
    Logout,

    /// Configuration file operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate a default client configuration file
    Init {
        /// Output file path (defaults to <data-dir>/config.json)
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct StatusReport {
    authenticated: bool,
    storage: PathBuf,
}

impl Commands {
    pub async fn execute(self, data_dir: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
        match self {
            Commands::Login { username, password } => {
                let client = connect(&data_dir, config_path)?;
                client.login(&username, &password).await?;
                println!("Logged in as {username}");
                Ok(())
            }
            Commands::Status => {
                let client = connect(&data_dir, config_path)?;
                print_json(&StatusReport {
                    authenticated: client.session().is_authenticated().is_some(),
                    storage: client.config().storage_path.clone(),
                })
            }
            Commands::Me => {
                let client = connect(&data_dir, config_path)?;
                let profile = client.current_user().await.map_err(suggest_login)?;
                print_json(&profile)
            }
            Commands::Products { page, limit } => {
                let client = connect(&data_dir, config_path)?;
                let page = client
                    .products(ProductQuery { page, limit })
                    .await
                    .map_err(suggest_login)?;
                print_json(&page)
            }
            Commands::Fetch {
                endpoint,
                method,
                body,
                headers,
                credentials,
            } => {
                let mut request = RequestDescriptor::new(method, endpoint).credentials(credentials);
                for raw in &headers {
                    let (name, value) = parse_header(raw)?;
                    request = request.header(name, value);
                }
                if let Some(body) = body {
                    request = request.body(body);
                }
                let client = connect(&data_dir, config_path)?;
                let response = client.execute(&request).await.map_err(suggest_login)?;
                print_json(&response)
            }
            Commands::Logout => {
                let client = connect(&data_dir, config_path)?;
                client.logout()?;
                println!("Logged out");
                Ok(())
            }
            Commands::Config { command } => command.execute(data_dir),
        }
    }
}

fn connect(data_dir: &Path, config_path: Option<PathBuf>) -> Result<AuthClient> {
    let client_config = config::load_client_config(data_dir, config_path)?;
    info!("Using base URL {}", client_config.base_url);
    Ok(AuthClient::builder().config(client_config).build()?)
}

impl ConfigCommands {
    pub fn execute(self, data_dir: PathBuf) -> Result<()> {
        match self {
            ConfigCommands::Init { output } => {
                let config_path = output.unwrap_or_else(|| data_dir.join(config::CONFIG_FILE));
                config::generate_default_config(&config_path, &data_dir)?;
                println!("Generated configuration at: {}", config_path.display());
                Ok(())
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header must look like `Name: value`, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("header name is empty in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn suggest_login(err: ClientError) -> anyhow::Error {
    if err.is_auth_expired() {
        anyhow::Error::new(err).context("session is missing or expired, run `authfetch login`")
    } else {
        err.into()
    }
}
