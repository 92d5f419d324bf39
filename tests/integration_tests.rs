//! Integration tests for the telemetry server and client
//!
//! These tests run the real server on a loopback port and drive it with real
//! TCP connections.

use server::client_manager::ClientRegistry;
use server::clock::ManualClock;
use server::config::ServerConfig;
use server::error::ServerError;
use server::event_log::{EventKind, EventLog, EventRecord};
use server::network::Server;
use server::vehicle::Vehicle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const START: u64 = 1_700_000_000;
const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    clock: Arc<ManualClock>,
    registry: Arc<ClientRegistry>,
    vehicle: Arc<Vehicle>,
    events: mpsc::UnboundedReceiver<EventRecord>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let (log, events) = EventLog::capture();
        let server = Server::bind_with_clock(config, log, clock.clone())
            .await
            .unwrap();

        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let vehicle = server.vehicle();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            clock,
            registry,
            vehicle,
            events,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Periodic tasks effectively disabled
    async fn quiet() -> Self {
        Self::start(ServerConfig {
            telemetry_interval: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(3600),
            ..ServerConfig::with_addr("127.0.0.1:0")
        })
        .await
    }

    async fn connect(&self) -> TestConnection {
        TestConnection::connect(self.addr).await
    }

    async fn wait_for_clients(&self, count: usize) {
        timeout(WAIT, async {
            while self.registry.len().await != count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {} clients", count));
    }

    fn drain_events(&mut self) -> Vec<EventRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.events.try_recv() {
            records.push(record);
        }
        records
    }

    async fn stop(mut self) -> Vec<EventRecord> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        timeout(WAIT, &mut self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        self.drain_events()
    }
}

struct TestConnection {
    local_addr: SocketAddr,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestConnection {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let local_addr = stream.local_addr().unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            local_addr,
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Next frame with its lines joined by CRLF, or None on EOF
    async fn read_frame(&mut self) -> Option<String> {
        timeout(WAIT, async {
            let mut frame: Vec<String> = Vec::new();
            loop {
                match self.lines.next_line().await {
                    Ok(Some(line)) if line.is_empty() => {
                        if !frame.is_empty() {
                            return Some(frame.join("\r\n"));
                        }
                    }
                    Ok(Some(line)) => frame.push(line),
                    Ok(None) | Err(_) => return None,
                }
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    async fn request(&mut self, line: &str) -> String {
        self.send(line).await;
        self.read_frame().await.expect("connection closed")
    }

    async fn expect_closed(&mut self) {
        assert_eq!(self.read_frame().await, None);
    }
}

fn kinds(records: &[EventRecord]) -> Vec<EventKind> {
    records.iter().map(|record| record.kind).collect()
}

/// END-TO-END PROTOCOL TESTS
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn admin_session_end_to_end() {
        let server = TestServer::quiet().await;
        let mut conn = server.connect().await;

        assert_eq!(
            conn.request("GET_DATA:").await,
            format!(
                "DATA: 0 100 20 STRAIGHT\r\nSERVER: telemetry_server\r\nTIMESTAMP: {}",
                START
            )
        );
        assert_eq!(conn.request("AUTH: admin admin123").await, "AUTH_SUCCESS");
        assert_eq!(
            conn.request("SEND_CMD: SPEED_UP").await,
            "OK: Speed increased to 10 km/h"
        );
        assert_eq!(conn.request("SEND_CMD: TURN_LEFT").await, "OK: Turning left");
        assert!(conn
            .request("GET_DATA:")
            .await
            .starts_with("DATA: 10 100 20 LEFT\r\n"));

        assert_eq!(
            conn.request("LIST_USERS:").await,
            format!("USERS: admin({})", conn.local_addr)
        );

        server.clock.advance(600);
        assert!(conn.request("GET_DATA:").await.starts_with("DATA: 10 80 26 LEFT"));
        assert_eq!(
            conn.request("RECHARGE:").await,
            "OK: Battery recharged to 100%"
        );
        assert!(conn.request("GET_DATA:").await.starts_with("DATA: 10 100 26 LEFT"));

        assert_eq!(conn.request("DISCONNECT:").await, "OK: Disconnecting");
        conn.expect_closed().await;
        server.wait_for_clients(0).await;

        let records = server.stop().await;
        let kinds = kinds(&records);
        assert_eq!(kinds.first(), Some(&EventKind::ServerStart));
        assert!(kinds.contains(&EventKind::Connect));
        assert!(kinds.contains(&EventKind::AuthSuccess));
        assert!(kinds.contains(&EventKind::CommandExecuted));
        assert!(kinds.contains(&EventKind::DisconnectRequest));
        assert_eq!(kinds.last(), Some(&EventKind::ServerStop));
    }

    #[tokio::test]
    async fn unauthorized_control_has_no_effect() {
        let server = TestServer::quiet().await;
        let mut conn = server.connect().await;

        assert_eq!(conn.request("AUTH: admin wrong").await, "AUTH_FAILED");
        for line in ["SEND_CMD: SPEED_UP", "LIST_USERS:", "RECHARGE:"] {
            assert_eq!(conn.request(line).await, "ERROR: Not authorized");
        }

        let state = server.vehicle.state().await;
        assert_eq!(state.speed_kmh, 0);
        assert_eq!(state.direction, shared::Direction::Straight);

        let records = server.stop().await;
        let unauthorized = records
            .iter()
            .filter(|record| record.kind == EventKind::Unauthorized)
            .count();
        assert_eq!(unauthorized, 3);
    }

    #[tokio::test]
    async fn malformed_and_unknown_lines() {
        let server = TestServer::quiet().await;
        let mut conn = server.connect().await;
        conn.request("AUTH: admin admin123").await;

        assert_eq!(conn.request("HELLO").await, "ERROR: Command not recognized");
        assert_eq!(
            conn.request("AUTH: admin").await,
            "ERROR: Command not recognized"
        );
        assert_eq!(
            conn.request("SEND_CMD: FLY").await,
            "ERROR: Invalid command"
        );
        assert_eq!(
            conn.request("SEND_CMD: SLOW_DOWN").await,
            "ERROR: Minimum speed reached"
        );

        // Still connected and still admin
        assert_eq!(
            conn.request("SEND_CMD: SPEED_UP").await,
            "OK: Speed increased to 10 km/h"
        );
        server.stop().await;
    }

    #[tokio::test]
    async fn header_lines_are_not_answered() {
        let server = TestServer::quiet().await;
        let mut conn = server.connect().await;

        conn.send("GET_DATA:\r\nUSER: viewer\r\nTIMESTAMP: 1700000000\r\n\r")
            .await;
        assert!(conn.read_frame().await.unwrap().starts_with("DATA: "));

        // The next frame answers DISCONNECT, nothing was sent for the headers
        assert_eq!(conn.request("DISCONNECT:").await, "OK: Disconnecting");
        conn.expect_closed().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn client_library_against_server() {
        let server = TestServer::quiet().await;
        let mut client = client::network::Client::connect(&server.addr.to_string())
            .await
            .unwrap();

        assert!(client.authenticate("admin", "admin123").await.unwrap());
        assert!(client.is_authenticated());

        let mut pushes = Vec::new();
        let reply = client
            .request(
                &shared::Command::SendControl(shared::ControlAction::SpeedUp),
                &mut pushes,
            )
            .await
            .unwrap();
        assert_eq!(
            reply,
            shared::ServerMessage::Ok("Speed increased to 10 km/h".to_string())
        );
        assert_eq!(server.vehicle.state().await.speed_kmh, 10);

        server.stop().await;
    }
}

/// CONCURRENCY AND LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn fifty_first_connection_is_rejected() {
        let mut server = TestServer::quiet().await;

        let mut conns = Vec::new();
        for _ in 0..50 {
            conns.push(server.connect().await);
        }
        server.wait_for_clients(50).await;

        let mut rejected = server.connect().await;
        rejected.expect_closed().await;
        assert_eq!(server.registry.len().await, 50);
        assert!(kinds(&server.drain_events()).contains(&EventKind::ConnectionRejected));

        // Existing sessions are unaffected
        assert!(conns[49].request("GET_DATA:").await.starts_with("DATA: "));

        // A freed slot is available again
        drop(conns.pop());
        server.wait_for_clients(49).await;
        let mut late = server.connect().await;
        server.wait_for_clients(50).await;
        assert!(late.request("GET_DATA:").await.starts_with("DATA: "));

        server.stop().await;
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let server = TestServer::start(ServerConfig {
            telemetry_interval: Duration::from_millis(100),
            reap_interval: Duration::from_secs(3600),
            ..ServerConfig::with_addr("127.0.0.1:0")
        })
        .await;

        let mut a = server.connect().await;
        let broken = server.connect().await;
        let mut c = server.connect().await;
        server.wait_for_clients(3).await;
        drop(broken);
        server.wait_for_clients(2).await;

        for conn in [&mut a, &mut c] {
            let frame = conn.read_frame().await.unwrap();
            assert!(frame.starts_with("DATA: 0 100 20 STRAIGHT\r\nSERVER: telemetry_server"));
        }

        // Pushes keep coming
        assert!(a.read_frame().await.unwrap().starts_with("DATA: "));
        server.stop().await;
    }

    #[tokio::test]
    async fn reaper_evicts_idle_clients() {
        let mut server = TestServer::start(ServerConfig {
            telemetry_interval: Duration::from_secs(3600),
            reap_interval: Duration::from_millis(50),
            ..ServerConfig::with_addr("127.0.0.1:0")
        })
        .await;

        let mut active = server.connect().await;
        let mut idle = server.connect().await;
        server.wait_for_clients(2).await;

        server.clock.advance(200);
        active.request("GET_DATA:").await;
        server.clock.advance(101);

        server.wait_for_clients(1).await;
        idle.expect_closed().await;
        assert!(active.request("GET_DATA:").await.starts_with("DATA: "));

        let timeouts: Vec<EventRecord> = server
            .drain_events()
            .into_iter()
            .filter(|record| record.kind == EventKind::Timeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].peer, Some(idle.local_addr));

        server.stop().await;
    }

    #[tokio::test]
    async fn shutdown_closes_all_connections() {
        let server = TestServer::quiet().await;
        let mut a = server.connect().await;
        let mut b = server.connect().await;
        server.wait_for_clients(2).await;

        let registry = Arc::clone(&server.registry);
        let addr = server.addr;
        let records = server.stop().await;

        a.expect_closed().await;
        b.expect_closed().await;
        assert!(registry.is_empty().await);
        assert_eq!(kinds(&records).last(), Some(&EventKind::ServerStop));

        // Listener is gone
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_admins_keep_speed_in_range() {
        let server = TestServer::quiet().await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let addr = server.addr;
            tasks.push(tokio::spawn(async move {
                let mut conn = TestConnection::connect(addr).await;
                assert_eq!(conn.request("AUTH: admin admin123").await, "AUTH_SUCCESS");
                let action = if i % 2 == 0 { "SPEED_UP" } else { "SLOW_DOWN" };
                for _ in 0..20 {
                    let reply = conn.request(&format!("SEND_CMD: {}", action)).await;
                    assert!(reply.starts_with("OK: ") || reply.starts_with("ERROR: "));
                }
                conn.request("DISCONNECT:").await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "OK: Disconnecting");
        }

        let speed = server.vehicle.state().await.speed_kmh;
        assert!(speed <= 100);
        assert_eq!(speed % 10, 0);
        server.stop().await;
    }
}
