//! TCP front end: accept loop, per-connection handlers and the two periodic
//! tasks
//!
//! Every accepted socket gets its own task. The handler multiplexes three
//! sources with `select!`: request lines from the peer, frames queued for it
//! by the broadcaster, and the server-wide shutdown signal. Only the handler
//! ever writes to its socket.

use crate::client_manager::{ClientRegistry, ConnectionHandle, ConnectionId};
use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::event_log::{EventKind, EventLog};
use crate::protocol::Dispatcher;
use crate::vehicle::Vehicle;
use futures::StreamExt;
use log::{debug, error, info, warn};
use shared::{is_header_line, MAX_LINE_LEN};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};

/// How long connection handlers get to wind down after shutdown is signalled
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Telemetry server bound to a listening socket
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    vehicle: Arc<Vehicle>,
    events: EventLog,
}

impl Server {
    pub async fn bind(config: ServerConfig, events: EventLog) -> Result<Self, ServerError> {
        Self::bind_with_clock(config, events, Arc::new(SystemClock)).await
    }

    /// Binds with an explicit time source for the registry and vehicle
    pub async fn bind_with_clock(
        config: ServerConfig,
        events: EventLog,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let listener =
            TcpListener::bind(&config.bind_addr)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: config.bind_addr.clone(),
                    source,
                })?;

        let registry = Arc::new(ClientRegistry::new(config.max_clients, clock.clone()));
        let vehicle = Arc::new(Vehicle::new(clock));

        Ok(Self {
            listener,
            config,
            registry,
            vehicle,
            events,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn vehicle(&self) -> Arc<Vehicle> {
        Arc::clone(&self.vehicle)
    }

    /// Serves clients until `shutdown` completes.
    ///
    /// On shutdown the listener is dropped, every session is closed and the
    /// spawned tasks are drained before returning.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.vehicle),
            self.events.clone(),
        );

        self.events.record(
            EventKind::ServerStart,
            None,
            format!("Server started on {}", local_addr),
        );

        let mut background = JoinSet::new();
        background.spawn(run_broadcaster(
            Arc::clone(&self.registry),
            Arc::clone(&self.vehicle),
            self.events.clone(),
            self.config.telemetry_interval,
            shutdown_tx.subscribe(),
        ));
        background.spawn(run_reaper(
            Arc::clone(&self.registry),
            self.events.clone(),
            self.config.client_timeout,
            self.config.reap_interval,
            shutdown_tx.subscribe(),
        ));

        let mut connections = JoinSet::new();
        let mut next_connection: ConnectionId = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        next_connection += 1;
                        self.admit(
                            socket,
                            peer,
                            next_connection,
                            &dispatcher,
                            &shutdown_tx,
                            &mut connections,
                        )
                        .await;
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        self.events
                            .record(EventKind::Error, None, format!("Accept failed: {}", e));
                    }
                },

                Some(joined) = connections.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection handler panicked: {:?}", e);
                        }
                    }
                }
            }
        }

        let Server {
            listener,
            registry,
            events,
            ..
        } = self;
        drop(listener);

        if shutdown_tx.send(()).is_err() {
            debug!("No task was listening for the shutdown signal");
        }
        let closed = registry.close_all().await;

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} connection handlers still busy after {:?}, aborting them",
                connections.len(),
                DRAIN_TIMEOUT
            );
            connections.shutdown().await;
        }
        while background.join_next().await.is_some() {}

        events.record(
            EventKind::ServerStop,
            None,
            format!("Server stopped, {} sessions closed", closed),
        );
        Ok(())
    }

    /// Registers a fresh connection and spawns its handler, or turns it away
    /// when the registry is full.
    async fn admit(
        &self,
        socket: TcpStream,
        peer: SocketAddr,
        connection: ConnectionId,
        dispatcher: &Dispatcher,
        shutdown_tx: &broadcast::Sender<()>,
        connections: &mut JoinSet<()>,
    ) {
        let (handle, outbound) = ConnectionHandle::channel(connection);

        match self.registry.add(handle, peer).await {
            Ok(session) => {
                debug!("Connection {} from {} holds slot {}", connection, peer, session);
                self.events
                    .record(EventKind::Connect, Some(peer), "Client connected");

                let handler = ConnectionHandler::new(
                    socket,
                    peer,
                    connection,
                    dispatcher.clone(),
                    Arc::clone(&self.registry),
                    self.events.clone(),
                    outbound,
                    shutdown_tx.subscribe(),
                );
                connections.spawn(handler.run());
            }
            Err(e) => {
                // Dropping the socket closes it
                self.events
                    .record(EventKind::ConnectionRejected, Some(peer), e.to_string());
            }
        }
    }
}

/// Why a connection handler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    PeerClosed,
    Requested,
    Evicted,
    Shutdown,
}

/// Serves one connection over any byte stream
pub struct ConnectionHandler<S> {
    lines: FramedRead<ReadHalf<S>, AnyDelimiterCodec>,
    writer: WriteHalf<S>,
    peer: SocketAddr,
    connection: ConnectionId,
    dispatcher: Dispatcher,
    registry: Arc<ClientRegistry>,
    events: EventLog,
    outbound: mpsc::Receiver<String>,
    shutdown: broadcast::Receiver<()>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: S,
        peer: SocketAddr,
        connection: ConnectionId,
        dispatcher: Dispatcher,
        registry: Arc<ClientRegistry>,
        events: EventLog,
        outbound: mpsc::Receiver<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: FramedRead::new(
                reader,
                AnyDelimiterCodec::new_with_max_length(
                    b"\n".to_vec(),
                    b"\n".to_vec(),
                    MAX_LINE_LEN,
                ),
            ),
            writer,
            peer,
            connection,
            dispatcher,
            registry,
            events,
            outbound,
            shutdown,
        }
    }

    /// Runs until the peer leaves, asks to leave, is evicted or the server
    /// shuts down. The session is released on every path.
    pub async fn run(mut self) {
        match self.serve().await {
            Ok(Exit::PeerClosed) => {
                self.events
                    .record(EventKind::Disconnect, Some(self.peer), "Client disconnected");
            }
            Ok(Exit::Requested) | Ok(Exit::Evicted) | Ok(Exit::Shutdown) => {}
            Err(e) => {
                self.events
                    .record(EventKind::Error, Some(self.peer), format!("Connection error: {}", e));
            }
        }

        self.registry.remove_connection(self.connection).await;
        if let Err(e) = self.writer.shutdown().await {
            debug!("Closing connection to {}: {}", self.peer, e);
        }
    }

    async fn serve(&mut self) -> io::Result<Exit> {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => return Ok(Exit::Shutdown),

                frame = self.outbound.recv() => match frame {
                    Some(frame) => self.write(&frame).await?,
                    None => return Ok(Exit::Evicted),
                },

                line = self.lines.next() => match line {
                    Some(Ok(raw)) => {
                        // Invalid UTF-8 is replaced, not fatal
                        let line = String::from_utf8_lossy(&raw);
                        if self.process_line(line.trim_end_matches('\r')).await? {
                            return Ok(Exit::Requested);
                        }
                    }
                    Some(Err(e)) => return Err(into_io_error(e)),
                    None => return Ok(Exit::PeerClosed),
                },
            }
        }
    }

    /// Returns true once the peer has asked to disconnect
    async fn process_line(&mut self, line: &str) -> io::Result<bool> {
        if let Some(session) = self.registry.find_by_connection(self.connection).await {
            self.registry.touch(session).await;
        }
        if is_header_line(line) {
            return Ok(false);
        }

        self.events
            .record(EventKind::Command, Some(self.peer), line.trim());

        let reply = self
            .dispatcher
            .handle_line(self.connection, self.peer, line)
            .await;
        let text = reply.response.to_string();
        self.write(&text).await?;

        self.events
            .record(EventKind::Response, Some(self.peer), text.trim_end());
        Ok(reply.disconnect)
    }

    async fn write(&mut self, frame: &str) -> io::Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await
    }
}

fn into_io_error(e: AnyDelimiterCodecError) -> io::Error {
    match e {
        AnyDelimiterCodecError::Io(e) => e,
        AnyDelimiterCodecError::MaxChunkLengthExceeded => io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request line longer than {} bytes", MAX_LINE_LEN),
        ),
    }
}

/// Pushes a telemetry frame to every session once per `period`
async fn run_broadcaster(
    registry: Arc<ClientRegistry>,
    vehicle: Arc<Vehicle>,
    events: EventLog,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let telemetry = vehicle.decay_and_snapshot().await;
        let frame = telemetry.to_frame(vehicle.now());
        let report = registry.broadcast(&frame).await;

        for session in &report.evicted {
            events.record(
                EventKind::Error,
                Some(session.peer),
                "Error sending telemetry, client removed",
            );
        }
        if report.skipped > 0 {
            warn!(
                "Telemetry skipped for {} clients not draining their queue",
                report.skipped
            );
        }
        if report.delivered > 0 {
            events.record(
                EventKind::DataSent,
                None,
                format!(
                    "Telemetry sent to {} clients: {}",
                    report.delivered,
                    telemetry.data_line()
                ),
            );
        }
    }

    debug!("Broadcaster stopped");
}

/// Evicts sessions idle for longer than `timeout`, checking every `period`
async fn run_reaper(
    registry: Arc<ClientRegistry>,
    events: EventLog,
    timeout: Duration,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let expired = registry.sweep_expired(timeout.as_secs()).await;
        for session in &expired {
            events.record(
                EventKind::Timeout,
                Some(session.peer),
                format!("Client inactive for more than {} seconds", timeout.as_secs()),
            );
        }
        if !expired.is_empty() {
            info!("Reaped {} inactive clients", expired.len());
        }
    }

    debug!("Reaper stopped");
}
