//! Relay client implementation

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::messages::{ClientMessage, RelayMessage};

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A single WebSocket connection to the relay
pub struct RelayClient {
    config: ClientConfig,
    socket: Socket,
}

impl RelayClient {
    /// Connect to the relay
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let (socket, _response) = timeout(config.connect_timeout, connect_async(config.url.as_str()))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        info!(url = %config.url, "Connected to relay");

        Ok(Self { config, socket })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a message
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.send_raw(text).await
    }

    /// Send a sensor reading
    pub async fn send_sensor(&mut self, fields: Map<String, Value>) -> Result<()> {
        self.send(&ClientMessage::sensor(fields)).await
    }

    /// Send a command
    pub async fn send_command(&mut self, action: &str) -> Result<()> {
        self.send(&ClientMessage::command(action)).await
    }

    /// Send a text frame exactly as given
    pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<()> {
        let text: String = text.into();
        debug!(payload = %text, "Sending frame");
        self.socket.send(Message::text(text)).await?;
        Ok(())
    }

    /// Receive the next text payload; `None` once the relay closes
    pub async fn recv_raw(&mut self) -> Result<Option<String>> {
        while let Some(frame) = self.socket.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(text.to_string())),
                Message::Binary(data) => {
                    let text = String::from_utf8(data.to_vec())
                        .map_err(|e| ClientError::Connection(e.to_string()))?;
                    return Ok(Some(text));
                }
                Message::Close(frame) => {
                    debug!(frame = ?frame, "Relay closed connection");
                    return Ok(None);
                }
                // Pings are answered by tungstenite
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }

        Ok(None)
    }

    /// Receive and parse the next message
    pub async fn recv(&mut self) -> Result<Option<RelayMessage>> {
        match self.recv_raw().await? {
            Some(text) => Ok(Some(RelayMessage::parse(&text)?)),
            None => Ok(None),
        }
    }

    /// Receive with a deadline
    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<Option<RelayMessage>> {
        timeout(limit, self.recv())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Receive using the configured default timeout
    pub async fn recv_default_timeout(&mut self) -> Result<Option<RelayMessage>> {
        let limit = self.config.recv_timeout;
        self.recv_timeout(limit).await
    }

    /// Close the connection with a normal close frame
    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}
