//! Relay server implementation
//!
//! Accepts WebSocket connections, classifies inbound frames and fans them
//! out to every other connected client.

mod connections;
pub mod heartbeat;
mod relay;
mod router;
pub mod websocket;

pub use connections::{
    BroadcastReport, ClientConnection, CloseReason, ConnectionManager, ConnectionState,
    OutboundMessage,
};
pub use relay::{RelayServer, ServerState};
pub use router::{MessageRouter, RouterStats, StatsSnapshot};
pub use websocket::{create_router, WsState};
