//! Performance benchmarks for the request path

use server::client_manager::{ClientRegistry, ConnectionHandle};
use server::clock::{ManualClock, SystemClock};
use server::config::ServerConfig;
use server::event_log::EventLog;
use server::network::Server;
use server::protocol::Dispatcher;
use server::vehicle::Vehicle;
use shared::{Command, ServerMessage, Telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

const REQUEST_LINES: [&str; 7] = [
    "AUTH: admin admin123",
    "GET_DATA:",
    "SEND_CMD: SPEED_UP",
    "SEND_CMD: TURN_LEFT",
    "LIST_USERS:",
    "RECHARGE:",
    "BOGUS",
];

/// Benchmarks request line parsing
#[test]
fn benchmark_command_parsing() {
    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let _ = Command::parse(REQUEST_LINES[i % REQUEST_LINES.len()]);
    }

    let duration = start.elapsed();
    println!(
        "Command parsing: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks telemetry frame rendering and client-side parsing
#[test]
fn benchmark_telemetry_frames() {
    let telemetry = Telemetry {
        speed_kmh: 40,
        battery_pct: 73,
        temperature_c: 31,
        direction: shared::Direction::Right,
    };

    let iterations = 50_000;
    let start = Instant::now();

    for i in 0..iterations {
        let frame = telemetry.to_frame(1_700_000_000 + i as u64);
        match ServerMessage::parse(&frame) {
            ServerMessage::Telemetry { data, .. } => assert_eq!(data, telemetry),
            other => panic!("Unexpected message {:?}", other),
        }
    }

    let duration = start.elapsed();
    println!(
        "Telemetry frames: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks dispatching against a full registry
#[tokio::test]
async fn benchmark_dispatch() {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let registry = Arc::new(ClientRegistry::new(50, clock.clone()));
    let vehicle = Arc::new(Vehicle::new(clock.clone()));
    let dispatcher = Dispatcher::new(registry.clone(), vehicle, EventLog::console());

    let mut receivers = Vec::new();
    for connection in 0..50u64 {
        let (handle, rx) = ConnectionHandle::channel(connection);
        let peer = SocketAddr::from(([127, 0, 0, 1], 20_000 + connection as u16));
        registry.add(handle, peer).await.unwrap();
        receivers.push(rx);
    }

    let peer: SocketAddr = "127.0.0.1:20049".parse().unwrap();
    let iterations = 20_000;
    let start = Instant::now();

    for i in 0..iterations {
        let line = REQUEST_LINES[i % REQUEST_LINES.len()];
        let _ = dispatcher.handle_line(49, peer, line).await;
    }

    let duration = start.elapsed();
    println!(
        "Dispatch: {} commands in {:?} ({:.2} μs/command)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks concurrent clients issuing requests over TCP
#[tokio::test]
async fn benchmark_concurrent_clients() {
    let config = ServerConfig {
        telemetry_interval: Duration::from_millis(50),
        ..ServerConfig::with_addr("127.0.0.1:0")
    };
    let server = Server::bind_with_clock(config, EventLog::console(), Arc::new(SystemClock))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run(async {
        let _ = shutdown_rx.await;
    }));

    let clients = 20;
    let requests = 50;
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..clients {
        tasks.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let mut replies = 0;

            for _ in 0..requests {
                writer.write_all(b"GET_DATA:\n").await.unwrap();
                // Broadcast pushes interleave with replies; both are DATA frames
                loop {
                    let line = lines.next_line().await.unwrap().unwrap();
                    if line.is_empty() {
                        break;
                    }
                }
                replies += 1;
            }
            replies
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Concurrent clients: {} requests from {} clients in {:?}",
        total, clients, duration
    );

    assert_eq!(total, clients * requests);
    assert!(duration.as_secs() < 10);

    let _ = shutdown_tx.send(());
    server_task.await.unwrap().unwrap();
}
