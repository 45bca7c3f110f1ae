//! End-to-end pairing benchmark for Parrot.
//!
//! Opens pairs of WebSocket clients against a running server, waits for
//! each pair to be matched and then ping-pongs chat messages between the
//! two sides, measuring relay round trips with real network I/O.
//!
//! ```bash
//! e2e_pairing [pairs] [url]
//! ```

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parrot_protocol::{codec, Category, ClientEvent, ServerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const DEFAULT_URL: &str = "ws://127.0.0.1:8000/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct Counters {
    round_trips: AtomicU64,
    latency_micros: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let pairs: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Parrot End-to-End Pairing Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_pairing_benchmark(pairs, url).await;
}

async fn run_pairing_benchmark(pairs: usize, url: String) {
    println!("📊 Pairing Benchmark: {} pairs against {}", pairs, url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(pairs + 1));
    let setup_start = Instant::now();

    let mut handles = Vec::new();
    for pair_id in 0..pairs {
        let counters = Arc::clone(&counters);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_pair(pair_id, &url, counters, barrier).await {
                eprintln!("Pair {} error: {}", pair_id, e);
            }
        }));
    }

    // Wait for every pair to be matched
    barrier.wait().await;
    let setup = setup_start.elapsed();
    println!("✓ All {} pairs matched in {:.2}s", pairs, setup.as_secs_f64());

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.round_trips.store(0, Ordering::SeqCst);
    counters.latency_micros.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let round_trips = counters.round_trips.load(Ordering::SeqCst);
    let latency_micros = counters.latency_micros.load(Ordering::SeqCst);

    let per_sec = round_trips as f64 / elapsed.as_secs_f64();
    let mean_micros = if round_trips == 0 {
        0.0
    } else {
        latency_micros as f64 / round_trips as f64
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Pairs:                {:>10}                           ║", pairs);
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Round Trips:          {:>10}                           ║",
        round_trips
    );
    println!(
        "║  Throughput:           {:>10.0} rt/s                     ║",
        per_sec
    );
    println!(
        "║  Mean Round Trip:      {:>10.0} µs                       ║",
        mean_micros
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_pair(
    pair_id: usize,
    url: &str,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let female_id = format!("bench-{pair_id}-f");
    let male_id = format!("bench-{pair_id}-m");

    let (female, _) = connect_async(url).await?;
    let (male, _) = connect_async(url).await?;
    let (mut female_tx, mut female_rx) = female.split();
    let (mut male_tx, mut male_rx) = male.split();

    // Concurrent pairs may cross; each side only trusts the partner it was matched with
    send(&mut female_tx, &ClientEvent::join(&female_id, "Bench", Category::Female)).await?;
    send(&mut male_tx, &ClientEvent::join(&male_id, "Bench", Category::Male)).await?;
    let female_partner = wait_for_match(&mut female_rx).await?;
    let male_partner = wait_for_match(&mut male_rx).await?;

    barrier.wait().await;

    // The male side echoes whatever its partner sends
    let echo = tokio::spawn(async move {
        loop {
            match next_event(&mut male_rx).await {
                Ok(Some(ServerEvent::Message(payload))) if payload.from == male_partner => {
                    let reply = ClientEvent::message(&male_id, payload.text);
                    if send(&mut male_tx, &reply).await.is_err() {
                        break;
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    });

    let mut seq = 0u64;
    loop {
        let sent_at = Instant::now();
        send(&mut female_tx, &ClientEvent::message(&female_id, seq.to_string())).await?;

        loop {
            match next_event(&mut female_rx).await? {
                Some(ServerEvent::Message(payload)) if payload.from == female_partner => break,
                Some(_) => continue,
                None => {
                    echo.abort();
                    return Ok(());
                }
            }
        }

        counters.round_trips.fetch_add(1, Ordering::Relaxed);
        counters
            .latency_micros
            .fetch_add(sent_at.elapsed().as_micros() as u64, Ordering::Relaxed);
        seq += 1;
    }
}

async fn send(sink: &mut SplitSink<Socket, Message>, event: &ClientEvent) -> Result<(), BoxError> {
    let text = codec::encode_client(event)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

/// Next server event, skipping control frames. `None` once the socket ends.
async fn next_event(stream: &mut SplitStream<Socket>) -> Result<Option<ServerEvent>, BoxError> {
    while let Some(message) = stream.next().await {
        if let Message::Text(text) = message? {
            return Ok(Some(codec::decode_server(&text)?));
        }
    }
    Ok(None)
}

/// Wait for `matched` and return the partner's ID.
async fn wait_for_match(stream: &mut SplitStream<Socket>) -> Result<String, BoxError> {
    loop {
        match next_event(stream).await? {
            Some(ServerEvent::Matched(payload)) => return Ok(payload.partner_id),
            Some(_) => continue,
            None => return Err("connection closed before match".into()),
        }
    }
}
