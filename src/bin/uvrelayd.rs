//! uvrelayd - WebSocket relay daemon

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uvrelay::{AllowedCommands, RelayConfig, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "uvrelayd")]
#[command(about = "WebSocket relay between UV sensor nodes and dashboards")]
#[command(version)]
struct Args {
    /// Interface to bind to
    #[arg(long, default_value = "0.0.0.0", env = "WS_HOST")]
    host: String,

    /// Port to bind to
    #[arg(short, long, default_value_t = 8765, env = "WS_PORT")]
    port: u16,

    /// Keep-alive ping interval in seconds (0 disables)
    #[arg(long, default_value_t = 20, env = "WS_PING_INTERVAL")]
    ping_interval: u64,

    /// Seconds a peer may go without answering pings
    #[arg(long, default_value_t = 20, env = "WS_PING_TIMEOUT")]
    ping_timeout: u64,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = 100, env = "WS_MAX_CONNECTIONS")]
    max_connections: usize,

    /// Comma-separated command actions clients may broadcast
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "read_sensor,debug_on,debug_off",
        env = "WS_ALLOWED_COMMANDS"
    )]
    allowed_commands: Vec<String>,

    /// Outbound queue depth per connection
    #[arg(long, default_value_t = 100, env = "WS_SEND_QUEUE")]
    send_queue: usize,

    /// Seconds to wait for connections to close on shutdown
    #[arg(long, default_value_t = 5, env = "WS_SHUTDOWN_GRACE")]
    shutdown_grace: u64,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, env = "WS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        RelayConfig::default()
            .bind(self.host, self.port)
            .ping(
                Duration::from_secs(self.ping_interval),
                Duration::from_secs(self.ping_timeout),
            )
            .max_connections(self.max_connections)
            .allowed_commands(AllowedCommands::new(self.allowed_commands))
            .send_queue_capacity(self.send_queue)
            .shutdown_grace(Duration::from_secs(self.shutdown_grace))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config();
    info!(
        url = %config.server_url(),
        max_connections = config.max_connections,
        allowed_commands = %config.allowed_commands,
        "uvrelayd starting"
    );

    let server = RelayServer::new(config);

    let token = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping relay");
        token.cancel();
    });

    server.run().await.context("Relay server failed")?;

    info!("uvrelayd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
