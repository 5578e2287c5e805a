//! Error type for the gateway process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket, handshake or transport failure
    #[error("Network error: {0}")]
    Network(String),
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
    /// Unexpected failure inside the gateway
    #[error("Internal error: {0}")]
    Internal(String),
}
