//! Connection state and the connection registry
//!
//! The registry is the only process-wide mutable state in the relay. All
//! membership changes go through [`ConnectionManager::add`] and
//! [`ConnectionManager::remove`]; broadcast works on a snapshot so a send
//! failure can never disturb iteration over the remaining peers.

use axum::extract::ws::close_code;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Frame queued for a client's write task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// JSON text, shared between all recipients of one broadcast
    Text(Arc<str>),
    /// Keep-alive probe
    Ping,
    /// Send a close frame and stop writing
    Close(CloseReason),
}

impl OutboundMessage {
    pub fn text(payload: impl Into<Arc<str>>) -> Self {
        OutboundMessage::Text(payload.into())
    }
}

/// Lifecycle of a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a connection left the `Open` state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame
    PeerClosed,
    /// Inbound stream ended without a close frame
    StreamEnded,
    /// Transport error on read
    ReadError,
    /// Outbound queue full or gone during a broadcast
    SendFailed,
    /// No pong within the heartbeat timeout
    HeartbeatTimeout,
    /// Relay is draining
    Shutdown,
    /// Rejected on accept because the relay is full
    AtCapacity,
}

impl CloseReason {
    /// WebSocket close code sent to the peer
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::PeerClosed | CloseReason::StreamEnded => close_code::NORMAL,
            CloseReason::ReadError => close_code::PROTOCOL,
            CloseReason::SendFailed => close_code::POLICY,
            CloseReason::HeartbeatTimeout => close_code::ERROR,
            CloseReason::Shutdown => close_code::AWAY,
            CloseReason::AtCapacity => close_code::AGAIN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::StreamEnded => "stream ended",
            CloseReason::ReadError => "read error",
            CloseReason::SendFailed => "send queue overflow",
            CloseReason::HeartbeatTimeout => "keepalive timeout",
            CloseReason::Shutdown => "server shutting down",
            CloseReason::AtCapacity => "server at capacity",
        }
    }
}

/// A connected client (sensor node or dashboard)
pub struct ClientConnection {
    /// Unique connection ID, never reused
    pub id: Uuid,
    /// Remote address, when the transport reports one
    pub peer: Option<SocketAddr>,
    /// When the connection was accepted
    pub connected_at: Instant,
    /// Channel for sending messages to this client
    tx: mpsc::Sender<OutboundMessage>,
    /// Whether the client has answered since the last heartbeat tick
    alive: AtomicBool,
    state: AtomicU8,
    close_reason: Mutex<Option<CloseReason>>,
    /// Fired to end the receive loop
    closer: CancellationToken,
}

impl ClientConnection {
    pub fn new(
        peer: Option<SocketAddr>,
        tx: mpsc::Sender<OutboundMessage>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            connected_at: Instant::now(),
            tx,
            alive: AtomicBool::new(true),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_reason: Mutex::new(None),
            closer,
        }
    }

    /// Peer IP for log lines
    pub fn peer_label(&self) -> String {
        self.peer
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting -> Open`
    pub fn mark_open(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Open)
    }

    /// `Connecting | Open -> Closing`; true only for the first caller
    pub fn begin_closing(&self) -> bool {
        self.transition(ConnectionState::Open, ConnectionState::Closing)
            || self.transition(ConnectionState::Connecting, ConnectionState::Closing)
    }

    /// Terminal state
    pub fn mark_closed(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queue a message without waiting
    pub fn try_send(&self, msg: OutboundMessage) -> Result<(), TrySendError<OutboundMessage>> {
        self.tx.try_send(msg)
    }

    /// Queue a message, waiting for room
    pub async fn send(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.tx.send(msg).await
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Read and clear the liveness flag
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Ask the receive loop to stop; the first reason wins
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.closer.cancel();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Token fired by [`close`](Self::close) or server shutdown
    pub fn close_token(&self) -> CancellationToken {
        self.closer.clone()
    }

    pub fn is_close_requested(&self) -> bool {
        self.closer.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) is called or the relay shuts down
    pub async fn closed(&self) {
        self.closer.cancelled().await
    }
}

/// Outcome of one broadcast sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Targets whose queue accepted the message
    pub delivered: usize,
    /// Targets removed because the send failed
    pub dropped: usize,
}

/// Manages all active connections
#[derive(Clone)]
pub struct ConnectionManager {
    /// All active connections by ID
    connections: Arc<DashMap<Uuid, Arc<ClientConnection>>>,
    /// Woken whenever a removal leaves the registry empty
    emptied: Arc<Notify>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            emptied: Arc::new(Notify::new()),
        }
    }

    /// Register a new connection
    pub fn add(&self, conn: Arc<ClientConnection>) {
        let peer = conn.peer_label();
        let id = conn.id;
        self.connections.insert(id, conn);
        info!(conn_id = %id, peer = %peer, total = self.count(), "Client connected");
    }

    /// Remove a connection; absent IDs are a no-op
    pub fn remove(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.remove(&id).map(|(_, conn)| conn);

        if let Some(conn) = &removed {
            info!(
                conn_id = %id,
                peer = %conn.peer_label(),
                total = self.count(),
                "Client disconnected"
            );
        }

        if self.connections.is_empty() {
            self.emptied.notify_waiters();
        }

        removed
    }

    /// Get a connection by ID
    pub fn get(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).map(|r| r.clone())
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Send `msg` to every registered connection except `exclude`
    ///
    /// A failed send never stops delivery to the others. Failed targets are
    /// collected during the sweep, then removed and told to close.
    pub fn broadcast(&self, msg: OutboundMessage, exclude: Option<Uuid>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for conn in self.snapshot() {
            if Some(conn.id) == exclude {
                continue;
            }

            match conn.try_send(msg.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let why = match e {
                        TrySendError::Full(_) => "send queue full",
                        TrySendError::Closed(_) => "send queue closed",
                    };
                    debug!(conn_id = %conn.id, error = why, "Failed to send to client");
                    failed.push(conn);
                }
            }
        }

        for conn in failed {
            if self.remove(conn.id).is_some() {
                report.dropped += 1;
            }
            conn.close(CloseReason::SendFailed);
        }

        report
    }

    /// Ask every registered connection to close
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let conns = self.snapshot();
        for conn in &conns {
            conn.close(reason);
        }
        conns.len()
    }

    /// Wait until the registry is empty or `timeout` elapses
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.emptied.notified();
                if self.connections.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Drop every entry, returning how many were still registered
    pub fn clear(&self) -> usize {
        let remaining = self.count();
        self.connections.clear();
        self.emptied.notify_waiters();
        remaining
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_conn(capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(ClientConnection::new(None, tx, CancellationToken::new()));
        (conn, rx)
    }

    fn text(s: &str) -> OutboundMessage {
        OutboundMessage::text(s)
    }

    #[test]
    fn test_count_tracks_adds_and_removes() {
        let manager = ConnectionManager::new();
        let (a, _ra) = make_conn(4);
        let (b, _rb) = make_conn(4);

        manager.add(a.clone());
        manager.add(b.clone());
        assert_eq!(manager.count(), 2);

        assert!(manager.remove(a.id).is_some());
        assert_eq!(manager.count(), 1);

        // Removing again is a no-op
        assert!(manager.remove(a.id).is_none());
        assert!(manager.remove(Uuid::new_v4()).is_none());
        assert_eq!(manager.count(), 1);

        manager.remove(b.id);
        assert_eq!(manager.count(), 0);
        assert!(manager.remove(b.id).is_none());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let manager = ConnectionManager::new();
        let (a, mut ra) = make_conn(4);
        let (b, mut rb) = make_conn(4);
        let (c, mut rc) = make_conn(4);
        manager.add(a.clone());
        manager.add(b);
        manager.add(c);

        let report = manager.broadcast(text("hello"), Some(a.id));

        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert_eq!(rb.try_recv().unwrap(), text("hello"));
        assert_eq!(rc.try_recv().unwrap(), text("hello"));
        assert!(ra.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_exclusion_reaches_everyone() {
        let manager = ConnectionManager::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (conn, rx) = make_conn(4);
            manager.add(conn);
            receivers.push(rx);
        }

        assert_eq!(manager.broadcast(text("x"), None).delivered, 5);
        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), text("x"));
        }
    }

    #[test]
    fn test_broadcast_to_empty_registry() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.broadcast(text("x"), None), BroadcastReport::default());
    }

    #[test]
    fn test_broadcast_to_only_the_sender() {
        let manager = ConnectionManager::new();
        let (a, mut ra) = make_conn(4);
        manager.add(a.clone());

        assert_eq!(manager.broadcast(text("x"), Some(a.id)).delivered, 0);
        assert!(ra.try_recv().is_err());
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_failed_target_is_removed_and_others_still_receive() {
        let manager = ConnectionManager::new();
        let (a, mut ra) = make_conn(4);
        let (b, rb) = make_conn(4);
        let (c, mut rc) = make_conn(4);
        manager.add(a.clone());
        manager.add(b.clone());
        manager.add(c.clone());

        // B's write side is gone
        drop(rb);

        let report = manager.broadcast(text("reading"), None);

        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 1 });
        assert_eq!(ra.try_recv().unwrap(), text("reading"));
        assert_eq!(rc.try_recv().unwrap(), text("reading"));
        assert!(manager.get(b.id).is_none());
        assert_eq!(manager.count(), 2);
        assert!(b.is_close_requested());
        assert_eq!(b.close_reason(), Some(CloseReason::SendFailed));
        assert!(!a.is_close_requested());
    }

    #[test]
    fn test_full_queue_drops_slow_consumer() {
        let manager = ConnectionManager::new();
        let (slow, _slow_rx) = make_conn(1);
        let (fast, mut fast_rx) = make_conn(8);
        manager.add(slow.clone());
        manager.add(fast);

        assert_eq!(manager.broadcast(text("1"), None).delivered, 2);
        let report = manager.broadcast(text("2"), None);

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert!(manager.get(slow.id).is_none());
        assert_eq!(fast_rx.try_recv().unwrap(), text("1"));
        assert_eq!(fast_rx.try_recv().unwrap(), text("2"));
    }

    #[test]
    fn test_per_destination_order_is_preserved() {
        let manager = ConnectionManager::new();
        let (conn, mut rx) = make_conn(16);
        manager.add(conn);

        for i in 0..10 {
            manager.broadcast(text(&i.to_string()), None);
        }
        for i in 0..10 {
            assert_eq!(rx.try_recv().unwrap(), text(&i.to_string()));
        }
    }

    #[test]
    fn test_state_transitions() {
        let (conn, _rx) = make_conn(1);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        assert_eq!(conn.state(), ConnectionState::Open);

        assert!(conn.begin_closing());
        assert!(!conn.begin_closing());
        assert_eq!(conn.state(), ConnectionState::Closing);

        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.begin_closing());
    }

    #[test]
    fn test_first_close_reason_wins() {
        let (conn, _rx) = make_conn(1);
        assert!(conn.close_reason().is_none());

        conn.close(CloseReason::HeartbeatTimeout);
        conn.close(CloseReason::SendFailed);

        assert!(conn.is_close_requested());
        assert_eq!(conn.close_reason(), Some(CloseReason::HeartbeatTimeout));
    }

    #[test]
    fn test_liveness_flag() {
        let (conn, _rx) = make_conn(1);
        assert!(conn.is_alive());
        assert!(conn.take_alive());
        assert!(!conn.take_alive());
        conn.mark_alive();
        assert!(conn.is_alive());
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseReason::PeerClosed.code(), 1000);
        assert_eq!(CloseReason::Shutdown.code(), 1001);
        assert_eq!(CloseReason::SendFailed.code(), 1008);
        assert_eq!(CloseReason::HeartbeatTimeout.code(), 1011);
        assert_eq!(CloseReason::AtCapacity.code(), 1013);
    }

    #[test]
    fn test_close_all_fires_every_token() {
        let manager = ConnectionManager::new();
        let (a, _ra) = make_conn(1);
        let (b, _rb) = make_conn(1);
        manager.add(a.clone());
        manager.add(b.clone());

        assert_eq!(manager.close_all(CloseReason::Shutdown), 2);
        assert_eq!(a.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(b.close_reason(), Some(CloseReason::Shutdown));
        // close_all does not mutate membership
        assert_eq!(manager.count(), 2);

        assert_eq!(manager.clear(), 2);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_wait_until_empty() {
        let manager = ConnectionManager::new();
        assert!(manager.wait_until_empty(Duration::from_millis(10)).await);

        let (a, _ra) = make_conn(1);
        let id = a.id;
        manager.add(a);
        assert!(!manager.wait_until_empty(Duration::from_millis(20)).await);

        let remover = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remover.remove(id);
        });
        assert!(manager.wait_until_empty(Duration::from_secs(5)).await);
    }
}
