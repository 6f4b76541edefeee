//! Relay server lifecycle

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::server::connections::{CloseReason, ConnectionManager};
use crate::server::router::MessageRouter;
use crate::server::websocket::{create_router, WsState};

use parking_lot::RwLock;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Server-level lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Idle,
    Starting,
    Listening,
    Draining,
    Stopped,
}

/// The relay server
pub struct RelayServer {
    config: Arc<RelayConfig>,
    connections: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    shutdown: CancellationToken,
    state: Arc<RwLock<ServerState>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let router = Arc::new(MessageRouter::new(
            connections.clone(),
            config.allowed_commands.clone(),
        ));

        Self {
            config: Arc::new(config),
            connections,
            router,
            shutdown: CancellationToken::new(),
            state: Arc::new(RwLock::new(ServerState::Idle)),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get the connection registry
    pub fn connections(&self) -> Arc<ConnectionManager> {
        self.connections.clone()
    }

    /// Get the message router (for injecting messages from outside)
    pub fn router(&self) -> Arc<MessageRouter> {
        self.router.clone()
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    fn set_state(&self, next: ServerState) {
        *self.state.write() = next;
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request a graceful shutdown
    pub fn signal_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn ws_state(&self) -> WsState {
        WsState {
            connections: self.connections.clone(),
            router: self.router.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            server_state: self.state.clone(),
        }
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener, RelayError> {
        self.set_state(ServerState::Starting);
        info!(url = %self.config.server_url(), "Starting relay");

        match TcpListener::bind((self.config.host.as_str(), self.config.port)).await {
            Ok(listener) => Ok(listener),
            Err(source) => {
                self.set_state(ServerState::Stopped);
                Err(RelayError::Bind {
                    addr: self.config.bind_addr(),
                    source,
                })
            }
        }
    }

    /// Accept connections until shutdown is signalled, then drain
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let local_addr = listener.local_addr()?;
        let app = create_router(self.ws_state());

        self.set_state(ServerState::Listening);
        info!(addr = %local_addr, "Relay listening");

        let shutdown = self.shutdown.clone();
        let state = self.state.clone();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            *state.write() = ServerState::Draining;
            info!("Shutting down relay");
        })
        .await;

        // The listener is closed; close whatever is still connected
        self.set_state(ServerState::Draining);
        let open = self.connections.close_all(CloseReason::Shutdown);
        if open > 0 {
            info!(connections = open, "Closing client connections");
        }

        if !self.connections.wait_until_empty(self.config.shutdown_grace).await {
            let forced = self.connections.clear();
            warn!(connections = forced, "Grace period elapsed, dropping connections");
        }

        self.set_state(ServerState::Stopped);
        info!("Relay stopped");

        result.map_err(RelayError::Serve)
    }

    /// Bind and serve
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}
