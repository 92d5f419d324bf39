//! Session registry for connected clients
//!
//! This module owns the table of sessions shared by every task in the server:
//! - Fixed-capacity slot table, one slot per open connection
//! - Authentication state and activity timestamps per session
//! - Telemetry fan-out to every session
//! - Inactivity sweeps
//!
//! A single lock guards the whole table. Every operation is a short scan over
//! at most `capacity` slots and never performs network I/O while the lock is
//! held: outbound data is queued on each session's channel and written by the
//! connection's own task.

use crate::clock::Clock;
use crate::error::RegistryError;
use shared::{ADMIN_PASSWORD, ADMIN_USERNAME};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

/// Index of a slot in the registry. Stable while the session lives, reused
/// after eviction.
pub type SessionId = usize;

/// Unique identity of an accepted connection. Never reused.
pub type ConnectionId = u64;

/// Frames queued per connection before broadcasts start skipping it
pub const OUTBOUND_QUEUE_LEN: usize = 32;

/// The registry's reference to a connection.
///
/// Holds the sending side of the connection's outbound queue. Dropping the
/// handle closes the queue, which tells the connection task to close the
/// socket.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

impl ConnectionHandle {
    fn new(id: ConnectionId, outbound: mpsc::Sender<String>) -> Self {
        Self { id, outbound }
    }

    /// Creates a handle together with the receiver the connection task drains
    pub fn channel(id: ConnectionId) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
        (Self::new(id, tx), rx)
    }
}

/// Registry entry for one connected client
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub connection: ConnectionHandle,
    pub peer: SocketAddr,
    /// Empty until authentication succeeds
    pub username: String,
    pub is_admin: bool,
    pub is_authenticated: bool,
    /// Unix seconds of the last received line
    pub last_activity: u64,
}

impl Session {
    fn new(id: SessionId, connection: ConnectionHandle, peer: SocketAddr, now: u64) -> Self {
        Self {
            id,
            connection,
            peer,
            username: String::new(),
            is_admin: false,
            is_authenticated: false,
            last_activity: now,
        }
    }

    /// `user(ip:port)`, with an empty user for unauthenticated sessions
    pub fn description(&self) -> String {
        format!("{}({}:{})", self.username, self.peer.ip(), self.peer.port())
    }

    fn is_expired(&self, now: u64, timeout_secs: u64) -> bool {
        now.saturating_sub(self.last_activity) > timeout_secs
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            connection_id: self.connection.id,
            peer: self.peer,
            username: self.username.clone(),
            is_admin: self.is_admin,
            is_authenticated: self.is_authenticated,
            last_activity: self.last_activity,
        }
    }
}

/// Copy of a session's fields taken under the registry lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub connection_id: ConnectionId,
    pub peer: SocketAddr,
    pub username: String,
    pub is_admin: bool,
    pub is_authenticated: bool,
    pub last_activity: u64,
}

/// Outcome of one telemetry fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the payload was queued for
    pub delivered: usize,
    /// Sessions whose queue was full; they miss this payload only
    pub skipped: usize,
    /// Sessions whose connection was gone; they have been removed
    pub evicted: Vec<SessionInfo>,
}

struct SlotTable {
    slots: Vec<Option<Session>>,
    occupied: usize,
}

impl SlotTable {
    fn take(&mut self, id: SessionId) -> Option<Session> {
        let session = self.slots.get_mut(id)?.take()?;
        self.occupied -= 1;
        Some(session)
    }
}

/// Thread-safe, bounded table of sessions
pub struct ClientRegistry {
    table: Mutex<SlotTable>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl ClientRegistry {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        Self {
            table: Mutex::new(SlotTable { slots, occupied: 0 }),
            capacity,
            clock,
        }
    }

    /// Claims the first free slot for a new connection
    ///
    /// Fails when every slot is occupied. The new session starts
    /// unauthenticated with its activity timestamp set to now.
    pub async fn add(
        &self,
        connection: ConnectionHandle,
        peer: SocketAddr,
    ) -> Result<SessionId, RegistryError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        if table.occupied >= self.capacity {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let id = table
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            })?;

        table.slots[id] = Some(Session::new(id, connection, peer, now));
        table.occupied += 1;
        Ok(id)
    }

    /// Frees a slot and drops its connection handle
    ///
    /// Idempotent. Returns the removed session, or None if the slot was
    /// already free.
    pub async fn remove(&self, id: SessionId) -> Option<SessionInfo> {
        let mut table = self.table.lock().await;
        table.take(id).map(|session| session.info())
    }

    /// Frees a slot only if it still belongs to `connection`
    ///
    /// Used by connection tasks on exit so a slot that was evicted and then
    /// handed to a new client is left alone.
    pub async fn remove_connection(&self, connection: ConnectionId) -> Option<SessionInfo> {
        let mut table = self.table.lock().await;
        let id = table
            .slots
            .iter()
            .flatten()
            .find(|session| session.connection.id == connection)
            .map(|session| session.id)?;
        table.take(id).map(|session| session.info())
    }

    /// Linear scan for the slot owning `connection`
    pub async fn find_by_connection(&self, connection: ConnectionId) -> Option<SessionId> {
        let table = self.table.lock().await;
        table
            .slots
            .iter()
            .flatten()
            .find(|session| session.connection.id == connection)
            .map(|session| session.id)
    }

    /// Marks a session as active now. No-op for a free or unknown slot.
    pub async fn touch(&self, id: SessionId) {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        if let Some(Some(session)) = table.slots.get_mut(id) {
            session.last_activity = now;
        }
    }

    /// Checks the static admin credentials
    ///
    /// On a match the session becomes authenticated and admin and keeps the
    /// user name. Returns false for a free slot even with correct
    /// credentials.
    pub async fn authenticate(&self, id: SessionId, username: &str, password: &str) -> bool {
        if username != ADMIN_USERNAME || password != ADMIN_PASSWORD {
            return false;
        }

        let mut table = self.table.lock().await;
        match table.slots.get_mut(id) {
            Some(Some(session)) => {
                session.is_authenticated = true;
                session.is_admin = true;
                session.username = username.to_string();
                true
            }
            _ => false,
        }
    }

    /// Queues `payload` for every session
    ///
    /// A session whose connection has gone away is evicted on the spot and
    /// the fan-out carries on with the remaining slots.
    pub async fn broadcast(&self, payload: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut table = self.table.lock().await;

        for id in 0..table.slots.len() {
            let result = match &table.slots[id] {
                Some(session) => session.connection.outbound.try_send(payload.to_string()),
                None => continue,
            };

            match result {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => report.skipped += 1,
                Err(TrySendError::Closed(_)) => {
                    if let Some(session) = table.take(id) {
                        report.evicted.push(session.info());
                    }
                }
            }
        }

        report
    }

    /// `user(ip:port)` for every occupied slot in slot order
    pub async fn list_descriptions(&self) -> Vec<String> {
        let table = self.table.lock().await;
        table
            .slots
            .iter()
            .flatten()
            .map(Session::description)
            .collect()
    }

    /// Evicts every session idle for more than `timeout_secs`
    pub async fn sweep_expired(&self, timeout_secs: u64) -> Vec<SessionInfo> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        let expired: Vec<SessionId> = table
            .slots
            .iter()
            .flatten()
            .filter(|session| session.is_expired(now, timeout_secs))
            .map(|session| session.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| table.take(id))
            .map(|session| session.info())
            .collect()
    }

    pub async fn session(&self, id: SessionId) -> Option<SessionInfo> {
        let table = self.table.lock().await;
        table.slots.get(id)?.as_ref().map(Session::info)
    }

    /// Evicts everything. Used at shutdown.
    pub async fn close_all(&self) -> usize {
        let mut table = self.table.lock().await;
        let count = table.occupied;
        for slot in table.slots.iter_mut() {
            *slot = None;
        }
        table.occupied = 0;
        count
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.occupied
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
