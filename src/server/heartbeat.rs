//! Keep-alive liveness tracking

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connections::ClientConnection;

/// Outcome of the heartbeat loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped answering pings
    TimedOut,
    /// The connection closed for some other reason
    Cancelled,
}

/// Number of consecutive silent ticks tolerated before giving up
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    (timeout.as_millis() / interval_ms).clamp(1, u32::MAX as u128) as u32
}

/// Watch a connection's liveness flag
///
/// Each tick reads and clears the flag; pongs set it again. `on_tick` runs
/// after every check so the caller can send the next ping.
pub async fn run_heartbeat<F>(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
    mut on_tick: F,
) -> HeartbeatResult
where
    F: FnMut(),
{
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let limit = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.take_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= limit {
                        return HeartbeatResult::TimedOut;
                    }
                }
                on_tick();
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
