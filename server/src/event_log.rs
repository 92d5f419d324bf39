//! Append-only protocol event log
//!
//! Records are handed to a background writer over an unbounded channel so
//! recording never waits on disk and never fails the caller. Each record is
//! also mirrored to the console through the `log` facade.

use crate::error::ServerError;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::fmt;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerStart,
    ServerStop,
    Connect,
    Disconnect,
    AuthSuccess,
    AuthFailed,
    Command,
    Response,
    Error,
    DataSent,
    CommandExecuted,
    UsersList,
    Timeout,
    ConnectionRejected,
    UnknownCommand,
    Unauthorized,
    DisconnectRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ServerStart => "SERVER_START",
            EventKind::ServerStop => "SERVER_STOP",
            EventKind::Connect => "CONNECT",
            EventKind::Disconnect => "DISCONNECT",
            EventKind::AuthSuccess => "AUTH_SUCCESS",
            EventKind::AuthFailed => "AUTH_FAILED",
            EventKind::Command => "COMMAND",
            EventKind::Response => "RESPONSE",
            EventKind::Error => "ERROR",
            EventKind::DataSent => "DATA_SENT",
            EventKind::CommandExecuted => "COMMAND_EXECUTED",
            EventKind::UsersList => "USERS_LIST",
            EventKind::Timeout => "TIMEOUT",
            EventKind::ConnectionRejected => "CONNECTION_REJECTED",
            EventKind::UnknownCommand => "UNKNOWN_COMMAND",
            EventKind::Unauthorized => "UNAUTHORIZED",
            EventKind::DisconnectRequest => "DISCONNECT_REQUEST",
        }
    }

    fn is_warning(&self) -> bool {
        matches!(
            self,
            EventKind::Error
                | EventKind::Unauthorized
                | EventKind::ConnectionRejected
                | EventKind::Timeout
                | EventKind::AuthFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub kind: EventKind,
    pub peer: Option<SocketAddr>,
    pub message: String,
    pub logged_at: DateTime<Local>,
}

impl EventRecord {
    /// `[2024-05-01 12:00:00] [CONNECT] 127.0.0.1:50312 - Client connected`
    pub fn to_line(&self) -> String {
        let timestamp = self.logged_at.format("%Y-%m-%d %H:%M:%S");
        match self.peer {
            Some(peer) => format!(
                "[{}] [{}] {}:{} - {}",
                timestamp,
                self.kind,
                peer.ip(),
                peer.port(),
                self.message
            ),
            None => format!("[{}] [{}] {}", timestamp, self.kind, self.message),
        }
    }
}

/// Cheaply clonable handle to the event log
#[derive(Debug, Clone)]
pub struct EventLog {
    sender: Option<mpsc::UnboundedSender<EventRecord>>,
}

impl EventLog {
    /// Opens (or creates) `path` for appending and starts the writer task.
    ///
    /// The returned handle completes once every `EventLog` clone is dropped
    /// and the queue has been written out.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), ServerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ServerError::EventLog {
                path: path.clone(),
                source,
            })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(event_writer_task(
            receiver,
            tokio::fs::File::from_std(file),
            path,
        ));

        Ok((
            Self {
                sender: Some(sender),
            },
            writer,
        ))
    }

    /// Console-only log with no file sink
    pub fn console() -> Self {
        Self { sender: None }
    }

    /// Log whose records are delivered to the returned receiver instead of
    /// a file
    pub fn capture() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn record(&self, kind: EventKind, peer: Option<SocketAddr>, message: impl Into<String>) {
        let record = EventRecord {
            kind,
            peer,
            message: message.into(),
            logged_at: Local::now(),
        };

        let console = match record.peer {
            Some(peer) => format!("[{}] {} - {}", record.kind, peer, record.message.trim_end()),
            None => format!("[{}] {}", record.kind, record.message.trim_end()),
        };
        if kind.is_warning() {
            warn!("{}", console);
        } else {
            info!("{}", console);
        }

        if let Some(sender) = &self.sender {
            // Writer already gone means we are shutting down
            if sender.send(record).is_err() {
                debug!("Event log writer closed, record dropped");
            }
        }
    }
}

async fn event_writer_task(
    mut receiver: mpsc::UnboundedReceiver<EventRecord>,
    mut file: tokio::fs::File,
    path: PathBuf,
) {
    while let Some(record) = receiver.recv().await {
        let mut line = record.to_line();
        line.push('\n');

        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!("Failed to write event log {}: {}", path.display(), e);
            continue;
        }
        if let Err(e) = file.flush().await {
            warn!("Failed to flush event log {}: {}", path.display(), e);
        }
    }
}
