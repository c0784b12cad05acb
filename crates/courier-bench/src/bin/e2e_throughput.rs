//! End-to-end throughput benchmark for Courier.
//!
//! This benchmark measures actual WebSocket relay throughput with real network I/O.
//! Clients are paired up; each one sends to its partner as fast as it can.
//!
//! Tokens are signed with `COURIER_AUTH__SECRET`, or the server's development
//! secret when unset.

use courier_core::{HmacTokenValidator, Identity};
use courier_protocol::{codec, Frame, WireFormat};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const DEVELOPMENT_SECRET: &str = "courier-development-secret";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_pairs: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(8);
    let format = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(WireFormat::MessagePack);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Courier End-to-End Throughput Benchmark              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_relay_benchmark(num_pairs, format).await;
}

async fn run_relay_benchmark(num_pairs: usize, format: WireFormat) {
    let num_clients = num_pairs * 2;
    println!("📊 Relay Benchmark: {} clients ({} pairs), {}", num_clients, num_pairs, format);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let secret =
        std::env::var("COURIER_AUTH__SECRET").unwrap_or_else(|_| DEVELOPMENT_SECRET.to_string());
    let issuer = HmacTokenValidator::new(secret);

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    // Spawn client tasks
    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let partner = client_id ^ 1;
        let token = match issuer.issue(
            &Identity::from(format!("bench-{}", client_id)),
            Duration::from_secs(3600),
        ) {
            Ok(token) => token,
            Err(e) => {
                eprintln!("Failed to issue token: {}", e);
                return;
            }
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(token, partner, format, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    // Warmup phase
    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    // Calculate throughput
    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Total Messages:       {:>10}                           ║",
        total_messages
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        msgs_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} msg/s                    ║",
        msgs_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    // Signal clients to stop
    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    token: String,
    partner: usize,
    format: WireFormat,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    // Connect to server
    let url = format!("{}?token={}&format={}", SERVER_URL, token, format);
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for all clients to be ready
    barrier.wait().await;

    // Pre-encode the frame; the server decodes binary as MessagePack and
    // text as JSON regardless of the outbound format.
    let frame = Frame::to(format!("bench-{}", partner), vec![0u8; 64]);
    let outgoing = match codec::encode(&frame, format)? {
        courier_protocol::WireMessage::Text(text) => Message::Text(text),
        courier_protocol::WireMessage::Binary(data) => Message::Binary(data.to_vec()),
    };

    // Spawn separate receiver task for full-duplex operation
    let recv_count = message_count.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Binary(_)) | Ok(Message::Text(_)) => {
                    recv_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    // Send loop - no waiting, just blast messages
    loop {
        if sender.send(outgoing.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
