//! Stress tests for relay fan-out
//!
//! Run with `cargo test --release --test stress -- --nocapture` for timings.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uvrelay::config::AllowedCommands;
use uvrelay::server::{ClientConnection, ConnectionManager, MessageRouter, OutboundMessage};

fn populate(
    manager: &ConnectionManager,
    count: usize,
    capacity: usize,
) -> Vec<mpsc::Receiver<OutboundMessage>> {
    (0..count)
        .map(|_| {
            let (tx, rx) = mpsc::channel(capacity);
            let conn = Arc::new(ClientConnection::new(None, tx, CancellationToken::new()));
            conn.mark_open();
            manager.add(conn);
            rx
        })
        .collect()
}

/// Broadcast cost should grow linearly with the number of peers
#[test]
fn test_broadcast_not_quadratic() {
    let peer_counts = [100, 1_000, 5_000];
    let iterations = 20;
    let mut times = vec![];

    for &count in &peer_counts {
        let manager = ConnectionManager::new();
        let _receivers = populate(&manager, count, iterations);
        let payload = OutboundMessage::text(r#"{"type":"sensor","uv_index":5}"#);

        let start = Instant::now();
        for _ in 0..iterations {
            let report = manager.broadcast(payload.clone(), None);
            assert_eq!(report.delivered, count);
        }
        let elapsed = start.elapsed();
        let per_peer_ns = elapsed.as_nanos() / (iterations * count) as u128;
        times.push((count, elapsed.as_micros().max(1)));

        println!(
            "Peers: {:>5}, Broadcasts: {}, Time: {:?}, Per peer: {}ns",
            count, iterations, elapsed, per_peer_ns
        );
    }

    let (small_count, small_time) = times[0];
    let (large_count, large_time) = times[times.len() - 1];

    let count_ratio = large_count as f64 / small_count as f64;
    let time_ratio = large_time as f64 / small_time as f64;

    println!(
        "\nPeer count ratio: {:.0}x, Time ratio: {:.1}x",
        count_ratio, time_ratio
    );

    assert!(
        time_ratio < count_ratio * 10.0,
        "Broadcast appears to be quadratic! Time grew {:.1}x for {:.0}x more peers",
        time_ratio,
        count_ratio
    );
}

/// Mixed traffic through the router at realistic volume
#[tokio::test]
async fn test_realistic_workload() {
    let connections = Arc::new(ConnectionManager::new());
    let router = MessageRouter::new(connections.clone(), AllowedCommands::default());

    // 20 sensor nodes and 5 dashboards
    let mut receivers = populate(&connections, 25, 2_000);

    // Origin outside the registry, so every peer gets a copy
    let origin = uuid::Uuid::new_v4();

    let start = Instant::now();
    for seq in 0..1_000 {
        let frame = match seq % 50 {
            0 => r#"{"type":"command","action":"read_sensor"}"#.to_string(),
            1 => r#"{"type":"command","action":"reboot"}"#.to_string(),
            2 => "garbage".to_string(),
            _ => format!(r#"{{"type":"sensor","seq":{},"uv_index":4.2}}"#, seq),
        };
        router.handle_text(&frame, origin);
    }
    let elapsed = start.elapsed();

    println!("1000 frames to 25 peers in {:?}", elapsed);

    let stats = router.stats();
    assert_eq!(stats.sensor, 940);
    assert_eq!(stats.command, 20);
    assert_eq!(stats.rejected, 20);
    assert_eq!(stats.malformed, 20);
    assert_eq!(stats.dropped_peers, 0);

    for rx in receivers.iter_mut() {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 960);
    }
}
