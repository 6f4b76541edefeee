//! uvrelay - real-time WebSocket relay for UV sensor nodes and dashboards
//!
//! Sensor nodes and browser dashboards keep persistent WebSocket connections
//! to the relay. Telemetry from one peer is fanned out verbatim to every
//! other peer; commands are checked against an allow-list and re-stamped with
//! the server time before fan-out.

pub mod config;
pub mod error;
pub mod messages;
pub mod server;

pub use config::{AllowedCommands, RelayConfig};
pub use error::{MessageError, RelayError};
pub use messages::{classify, Classified, MessageKind, ServerMessage};
pub use server::RelayServer;
