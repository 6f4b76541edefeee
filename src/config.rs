//! Relay configuration
//!
//! Every option has a default here; the daemon overrides them from its
//! command line and the `WS_*` environment variables.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Commands accepted when no allow-list is configured
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &["read_sensor", "debug_on", "debug_off"];

/// The closed set of `action` values a command message may carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedCommands {
    actions: BTreeSet<String>,
}

impl AllowedCommands {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions
                .into_iter()
                .map(Into::into)
                .map(|a: String| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    /// Flat string membership, no per-client scoping
    pub fn contains(&self, action: &str) -> bool {
        self.actions.contains(action)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }
}

impl Default for AllowedCommands {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_COMMANDS.iter().copied())
    }
}

impl fmt::Display for AllowedCommands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(","))
    }
}

/// Static runtime parameters, resolved once at startup
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interface to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Keep-alive ping period; `None` disables liveness probing
    pub ping_interval: Option<Duration>,

    /// How long a peer may go without answering pings
    pub ping_timeout: Duration,

    /// Soft cap on concurrent connections
    pub max_connections: usize,

    /// Allowed command actions
    pub allowed_commands: AllowedCommands,

    /// Per-connection outbound queue depth before the peer is dropped
    pub send_queue_capacity: usize,

    /// How long draining waits for connections to close
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            ping_interval: Some(Duration::from_secs(20)),
            ping_timeout: Duration::from_secs(20),
            max_connections: 100,
            allowed_commands: AllowedCommands::default(),
            send_queue_capacity: 100,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// Set the bind address
    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the ping interval in seconds; zero disables pings
    pub fn ping_interval_secs(mut self, secs: u64) -> Self {
        self.ping_interval = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    /// Set the ping interval and timeout
    pub fn ping(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = (!interval.is_zero()).then_some(interval);
        self.ping_timeout = timeout;
        self
    }

    /// Set the connection cap
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Replace the command allow-list
    pub fn allowed_commands(mut self, commands: AllowedCommands) -> Self {
        self.allowed_commands = commands;
        self
    }

    /// Set the outbound queue depth (at least 1)
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set the drain grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Address string for the listening socket
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full server URL
    pub fn server_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}
