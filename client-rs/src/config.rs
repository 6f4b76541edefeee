//! Configuration for the relay client

use std::time::Duration;

/// Configuration for connecting to a relay
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay URL (e.g., "ws://localhost:8765")
    pub url: String,

    /// Timeout for the WebSocket handshake
    pub connect_timeout: Duration,

    /// Default timeout for [`RelayClient::recv_timeout`](crate::RelayClient::recv_timeout)
    pub recv_timeout: Duration,
}

impl ClientConfig {
    /// Create a new configuration with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            recv_timeout: Duration::from_secs(5),
        }
    }

    /// Set the handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default receive timeout
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }
}
