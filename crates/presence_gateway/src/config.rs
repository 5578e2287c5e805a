//! Configuration management for the presence gateway.
//!
//! Settings are read from a TOML file and then overridden by command-line
//! arguments.

use crate::cli::CliArgs;
use crate::error::ServerError;
use presence_core::PresenceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_max_connections() -> usize {
    1000
}

fn default_login_timeout() -> u64 {
    30
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network settings
    pub server: ServerSettings,
    /// Spatial partitioning and actor tuning
    #[serde(default)]
    pub world: PresenceConfig,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Network settings of the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to listen on (e.g. "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a new connection has to name its player
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                max_connections: default_max_connections(),
                login_timeout_secs: default_login_timeout(),
            },
            world: PresenceConfig::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, ServerError> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ServerError::Config(format!("Cannot read {}: {e}", path.display())))?;
            toml::from_str(&content)
                .map_err(|e| ServerError::Config(format!("Cannot parse {}: {e}", path.display())))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)
                .map_err(|e| ServerError::Config(e.to_string()))?;
            tokio::fs::write(path, toml_content)
                .await
                .map_err(|e| ServerError::Config(format!("Cannot write {}: {e}", path.display())))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(depth) = args.depth {
            self.world.depth = depth;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }
        if self.server.max_connections == 0 {
            return Err("max_connections must be greater than zero".to_string());
        }

        self.world.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
