//! Error types for the presence layer.
//!
//! Failures are split by the layer that produced them so callers can tell a
//! bus outage from an unavailable actor or a rejected client update.

use thiserror::Error;

/// Errors raised by a message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been shut down and accepts no further traffic
    #[error("message bus is closed")]
    Closed,
    /// A publish could not be handed to the transport
    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
    /// An envelope could not be encoded or decoded
    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors raised when invoking a keyed actor.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The actor's mailbox is closed (stopped or evicted)
    #[error("{kind} actor '{key}' is unavailable")]
    Unavailable { kind: &'static str, key: String },
    /// The actor dropped the reply channel without answering
    #[error("{kind} actor '{key}' did not reply")]
    NoReply { kind: &'static str, key: String },
    /// The actor refused the request
    #[error("{kind} actor '{key}' rejected the request: {reason}")]
    Rejected {
        kind: &'static str,
        key: String,
        reason: String,
    },
    /// The actor failed to publish while serving the request
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors raised by a session coordinator.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client sent an update that violates position invariants
    #[error("invalid position: {0}")]
    InvalidPosition(String),
    /// The session has been closed
    #[error("session is closed")]
    Closed,
    /// The client channel is gone
    #[error("client channel closed")]
    ClientClosed,
    /// The session's subscription worker is no longer running
    #[error("subscription worker stopped")]
    WorkerStopped,
    /// A cell or player actor call failed
    #[error(transparent)]
    Actor(#[from] ActorError),
}
