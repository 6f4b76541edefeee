//! WebSocket transport
//!
//! Each accepted socket gets a read loop (this task) and a write task fed by
//! the connection's bounded outbound queue. Sensor nodes connect on `/`,
//! dashboards may use `/ws`.

use crate::config::RelayConfig;
use crate::server::connections::{
    ClientConnection, CloseReason, ConnectionManager, OutboundMessage,
};
use crate::server::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::server::relay::ServerState;
use crate::server::router::{MessageRouter, StatsSnapshot};

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a closing connection may spend flushing queued output
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub connections: Arc<ConnectionManager>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<RelayConfig>,
    pub shutdown: CancellationToken,
    pub server_state: Arc<RwLock<ServerState>>,
}

/// Create the HTTP router
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    state: ServerState,
    connections: usize,
    max_connections: usize,
    messages: StatsSnapshot,
}

async fn stats_handler(State(state): State<WsState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        state: *state.server_state.read(),
        connections: state.connections.count(),
        max_connections: state.config.max_connections,
        messages: state.router.stats(),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    }))
}

async fn handle_socket(mut socket: WebSocket, peer: SocketAddr, state: WsState) {
    let rejection = if state.shutdown.is_cancelled() {
        Some(CloseReason::Shutdown)
    } else if state.connections.count() >= state.config.max_connections {
        Some(CloseReason::AtCapacity)
    } else {
        None
    };

    if let Some(reason) = rejection {
        warn!(
            peer = %peer,
            limit = state.config.max_connections,
            reason = reason.as_str(),
            "Rejecting connection"
        );
        let _ = socket.send(close_message(reason)).await;
        return;
    }

    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<OutboundMessage>(state.config.send_queue_capacity);
    let conn = Arc::new(ClientConnection::new(
        Some(peer),
        tx,
        state.shutdown.child_token(),
    ));

    conn.mark_open();
    state.connections.add(conn.clone());

    let mut writer = tokio::spawn(write_loop(sender, rx));

    let heartbeat = {
        let conn = conn.clone();
        let config = state.config.clone();
        async move {
            match config.ping_interval {
                Some(interval) => {
                    let pinger = conn.clone();
                    run_heartbeat(
                        conn.clone(),
                        interval,
                        config.ping_timeout,
                        conn.close_token(),
                        move || {
                            let _ = pinger.try_send(OutboundMessage::Ping);
                        },
                    )
                    .await
                }
                None => std::future::pending().await,
            }
        }
    };

    let reason = tokio::select! {
        reason = read_loop(&mut receiver, &conn, &state.router) => reason,
        HeartbeatResult::TimedOut = heartbeat => {
            warn!(conn_id = %conn.id, peer = %conn.peer_label(), "Keepalive timeout");
            CloseReason::HeartbeatTimeout
        }
    };
    conn.close(reason);

    // Open -> Closing happens once; later triggers find nothing to do
    if conn.begin_closing() {
        state.connections.remove(conn.id);
    }
    debug!(conn_id = %conn.id, reason = reason.as_str(), "Connection closing");

    // Close frame goes behind whatever is still queued
    let flushed =
        tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, conn.send(OutboundMessage::Close(reason)))
            .await;
    if !matches!(flushed, Ok(Ok(()))) {
        writer.abort();
    }
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    conn.mark_closed();
}

async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    conn: &ClientConnection,
    router: &MessageRouter,
) -> CloseReason {
    loop {
        let next = tokio::select! {
            () = conn.closed() => {
                return conn.close_reason().unwrap_or(CloseReason::Shutdown);
            }
            next = receiver.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                conn.mark_alive();
                match msg {
                    Message::Text(text) => {
                        router.handle_text(text.as_str(), conn.id);
                    }
                    Message::Binary(data) => {
                        router.handle_binary(&data, conn.id);
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        // Pings are answered by axum
                    }
                    Message::Close(_) => return CloseReason::PeerClosed,
                }
            }
            Some(Err(e)) => {
                warn!(conn_id = %conn.id, error = %e, "WebSocket error");
                return CloseReason::ReadError;
            }
            None => return CloseReason::StreamEnded,
        }
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let frame = match msg {
            OutboundMessage::Text(text) => Message::Text(text.to_string().into()),
            OutboundMessage::Ping => Message::Ping(Default::default()),
            OutboundMessage::Close(reason) => {
                let _ = sender.send(close_message(reason)).await;
                break;
            }
        };

        if sender.send(frame).await.is_err() {
            break;
        }
    }

    let _ = sender.close().await;
}
