//! Message classification and fan-out

use crate::config::AllowedCommands;
use crate::messages::{classify, decode_binary, Classified, MessageKind, ServerMessage};
use crate::server::connections::{ConnectionManager, OutboundMessage};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-classification counters
#[derive(Debug, Default)]
pub struct RouterStats {
    sensor: AtomicU64,
    command: AtomicU64,
    rejected: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
    dropped_peers: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sensor: u64,
    pub command: u64,
    pub rejected: u64,
    pub unknown: u64,
    pub malformed: u64,
    pub dropped_peers: u64,
}

impl RouterStats {
    fn record(&self, kind: MessageKind) {
        let counter = match kind {
            MessageKind::Sensor => &self.sensor,
            MessageKind::Command => &self.command,
            MessageKind::Rejected => &self.rejected,
            MessageKind::Unknown => &self.unknown,
            MessageKind::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sensor: self.sensor.load(Ordering::Relaxed),
            command: self.command.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped_peers: self.dropped_peers.load(Ordering::Relaxed),
        }
    }
}

/// Classifies inbound frames and broadcasts the derived message
#[derive(Clone)]
pub struct MessageRouter {
    connections: Arc<ConnectionManager>,
    allowed: Arc<AllowedCommands>,
    stats: Arc<RouterStats>,
}

impl MessageRouter {
    pub fn new(connections: Arc<ConnectionManager>, allowed: AllowedCommands) -> Self {
        Self {
            connections,
            allowed: Arc::new(allowed),
            stats: Arc::new(RouterStats::default()),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle a text frame from `origin`, returning how many peers got a copy
    ///
    /// Never fails: malformed, unknown and rejected frames are logged and
    /// dropped without affecting the sender or anyone else.
    pub fn handle_text(&self, raw: &str, origin: Uuid) -> usize {
        debug!(conn_id = %origin, payload = raw, "Received frame");

        let classified = classify(raw, &self.allowed);
        self.stats.record(classified.kind());

        match classified {
            Classified::Sensor { raw } => {
                let delivered = self.fan_out(OutboundMessage::text(raw), origin);
                debug!(conn_id = %origin, delivered, "Relayed sensor data");
                delivered
            }
            Classified::Command { action } => {
                let msg = ServerMessage::command(action.as_str());
                let delivered = self.fan_out(OutboundMessage::text(msg.to_json()), origin);
                info!(conn_id = %origin, action = %action, delivered, "Broadcast command");
                delivered
            }
            Classified::Rejected { action } => {
                warn!(conn_id = %origin, action = ?action, "Invalid command");
                0
            }
            Classified::Unknown { kind } => {
                debug!(conn_id = %origin, kind = ?kind, "Unknown message type");
                0
            }
            Classified::Malformed(e) => {
                let preview: String = raw.chars().take(100).collect();
                warn!(conn_id = %origin, error = %e, payload = %preview, "Malformed message");
                0
            }
        }
    }

    /// Handle a binary frame; it must hold UTF-8 JSON
    pub fn handle_binary(&self, data: &[u8], origin: Uuid) -> usize {
        match decode_binary(data) {
            Ok(text) => self.handle_text(text, origin),
            Err(e) => {
                self.stats.record(MessageKind::Malformed);
                warn!(conn_id = %origin, error = %e, len = data.len(), "Malformed message");
                0
            }
        }
    }

    fn fan_out(&self, msg: OutboundMessage, origin: Uuid) -> usize {
        let report = self.connections.broadcast(msg, Some(origin));
        if report.dropped > 0 {
            self.stats
                .dropped_peers
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        report.delivered
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }
}
