//! End-to-end throughput benchmark for Conduit.
//!
//! Connects N WebSocket clients to a running server, joins them all to the
//! same room and counts how many relayed messages they receive.

use conduit_protocol::{codec, Message as Wire, Payload};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:4000/ws";
const CHANNEL: &str = "rooms";
const TOPIC: &str = "bench";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Conduit end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release --bin conduit");
    println!();

    run_room_benchmark(num_clients).await;
}

async fn run_room_benchmark(num_clients: usize) {
    println!("Room benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("All {} clients joined {}:{}", num_clients, CHANNEL, TOPIC);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("Results");
    println!("  Clients:         {:>10}", num_clients);
    println!("  Duration:        {:>10.2}s", elapsed.as_secs_f64());
    println!("  Total messages:  {:>10}", total_messages);
    println!("  Throughput:      {:>10.0} msg/s", msgs_per_sec);
    println!("  Per client:      {:>10.0} msg/s", msgs_per_sec_per_client);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();

    let mut join = Payload::new();
    join.insert("user".into(), format!("bench-{client_id}").into());
    let join = Wire::new(CHANNEL, TOPIC, "join", join);
    sender.send(Message::Text(codec::encode(&join))).await?;

    // Wait for the join reply
    while let Some(frame) = receiver.next().await {
        if let Message::Text(text) = frame? {
            if codec::decode(&text).is_ok_and(|m| m.event == "join") {
                break;
            }
        }
    }

    barrier.wait().await;

    let mut body = Payload::new();
    body.insert("body".into(), "x".repeat(64).into());
    let publish = Message::Text(codec::encode(&Wire::new(CHANNEL, TOPIC, "new:msg", body)));

    let recv_count = Arc::clone(&message_count);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if let Message::Text(text) = frame {
                if codec::decode(&text).is_ok_and(|m| m.event == "new:msg") {
                    recv_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(publish.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
