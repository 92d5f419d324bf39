//! # Telemetry Server Library
//!
//! This library provides a concurrent TCP server that lets many clients watch
//! and drive a single simulated vehicle. Clients speak a line-oriented text
//! protocol, authenticate to gain control rights, and receive periodic
//! telemetry pushes.
//!
//! ## Core Responsibilities
//!
//! ### Session Management
//! Handles the complete lifecycle of client connections including:
//! - Slot assignment in a fixed-capacity registry
//! - Authentication against the admin credentials
//! - Activity tracking and inactivity eviction
//! - Cleanup on disconnect, transport failure or shutdown
//!
//! ### Shared Vehicle State
//! One vehicle is shared by every connection. Its battery drains and its
//! temperature drifts with elapsed wall-clock time; the state is recomputed
//! lazily whenever telemetry is read.
//!
//! ### Telemetry Broadcasting
//! Every telemetry interval the current vehicle state is pushed to all
//! registered sessions, authenticated or not.
//!
//! ## Architecture Design
//!
//! ### Task per Connection
//! The accept loop spawns one task per connection. Two long-lived periodic
//! tasks run beside them: the broadcaster and the reaper. All of them share
//! exactly two locks, the registry lock and the vehicle lock.
//!
//! ### No Network I/O Under a Lock
//! Each lock is held for a single table or state operation. The broadcaster
//! queues frames on per-session channels instead of writing sockets, so a
//! slow client can never stall the rest of the server.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! The session registry:
//! - Slot table bounded by the configured capacity
//! - Authentication and activity timestamps
//! - Fan-out of telemetry frames with isolation of broken connections
//! - Inactivity sweeps
//!
//! ### Vehicle Module (`vehicle`)
//! The simulated vehicle with speed, direction, battery and temperature, and
//! the time-based decay applied before every telemetry read.
//!
//! ### Protocol Module (`protocol`)
//! Turns one parsed command into one response, enforcing admin rights for
//! vehicle control, user listing and recharging.
//!
//! ### Network Module (`network`)
//! Accept loop, connection handlers, broadcaster, reaper and shutdown.
//!
//! ### Supporting Modules
//! - `clock`: injectable time source
//! - `config`: runtime settings
//! - `event_log`: append-only protocol event log
//! - `error`: error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::event_log::EventLog;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (events, writer) = EventLog::open("server.log")?;
//!     let server = Server::bind(ServerConfig::with_addr("0.0.0.0:8080"), events).await?;
//!
//!     // Serve until Ctrl+C:
//!     // - accepts up to 50 concurrent clients
//!     // - answers AUTH/GET_DATA/SEND_CMD/LIST_USERS/RECHARGE/DISCONNECT
//!     // - broadcasts telemetry every 10 seconds
//!     // - evicts clients idle for more than 300 seconds
//!     server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     writer.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! ### Credentials
//! A single static admin account exists. Credentials travel in clear text;
//! the server is meant for trusted networks.
//!
//! ### Authorization
//! Rights are re-read from the registry for every privileged command, so an
//! evicted session never keeps control of the vehicle.

pub mod client_manager;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_log;
pub mod network;
pub mod protocol;
pub mod vehicle;
