//! Error types for cloud-sync

use incubator_state::{StateError, ValidationError};
use std::time::Duration;

/// Failures of the broker connection
///
/// All of these are transient from the client's point of view: it drops to
/// `Disconnected` and retries.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Broker rejected publish on '{0}'")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame encoding error: {0}")]
    Frame(#[from] serde_json::Error),
}

/// Malformed inbound messages; logged and dropped at the boundary
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed JSON on '{topic}': {source}")]
    MalformedJson {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Message on '{topic}' is missing '{field}'")]
    MissingField { topic: String, field: &'static str },

    #[error("No handler for topic '{0}'")]
    UnknownTopic(String),
}

/// Why a single delta key could not be resolved
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Unparseable value: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Commit rejected: {0}")]
    Rejected(ValidationError),

    #[error("Commit rejected")]
    RejectedUnknown,

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Thread error: {0}")]
    Thread(#[from] thread_manager::ThreadError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
