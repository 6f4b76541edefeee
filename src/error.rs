//! Error types for the relay

use thiserror::Error;

/// Fatal server-level errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Why an inbound frame could not be decoded as a record
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("binary payload is not valid UTF-8")]
    InvalidUtf8,
}
