//! # Presence Gateway
//!
//! Hosts the presence core behind a WebSocket endpoint. Each connected client
//! gets one session; configuration comes from a TOML file with command-line
//! overrides.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod signals;

pub use cli::CliArgs;
pub use config::{AppConfig, LoggingSettings, ServerSettings};
pub use error::ServerError;
pub use server::GatewayServer;
