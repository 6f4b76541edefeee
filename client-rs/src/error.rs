//! Error types for the relay client

use thiserror::Error;

/// Errors that can occur when using the relay client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection to the relay failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Failed to serialize/deserialize message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket error
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay closed the connection
    #[error("Connection closed")]
    Closed,
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
