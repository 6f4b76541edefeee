//! uvrelay Rust client
//!
//! An async WebSocket client for the uvrelay message relay. Sensor-side
//! tools use it to push readings; dashboards and tests use it to receive
//! relayed readings and commands.
//!
//! # Example
//!
//! ```no_run
//! use uvrelay_client::{ClientConfig, RelayClient, RelayMessage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RelayClient::connect(ClientConfig::new("ws://localhost:8765")).await?;
//!
//!     // Ask every sensor node for a fresh reading
//!     client.send_command("read_sensor").await?;
//!
//!     while let Some(msg) = client.recv().await? {
//!         if let RelayMessage::Sensor(fields) = msg {
//!             println!("reading: {:?}", fields);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod messages;

pub use client::RelayClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use messages::{ClientMessage, RelayMessage};
