//! # Telemetry Console Client Library
//!
//! This library provides a terminal client for the vehicle telemetry server.
//! It turns short typed words into protocol commands, prints every frame the
//! server sends, and keeps track of whether the session is authenticated.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Translates console words such as `up`, `left` or `users` into protocol
//! commands. Unrecognised text is passed to the server unchanged.
//!
//! ### Network Module (`network`)
//! Owns the TCP connection:
//! - Line-oriented request encoding
//! - Reassembly of blank-line terminated reply frames
//! - The interactive loop multiplexing console input and server pushes
//!
//! ### Rendering Module (`rendering`)
//! Formats server frames for the console, including a low battery warning
//! on telemetry.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:8080").await?;
//!     client.authenticate("admin", "admin123").await?;
//!     client.run(tokio::io::stdin()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Philosophy
//!
//! ### The Server Decides
//! The client warns before sending a privileged command while
//! unauthenticated, but still sends it. Authorization is enforced only by
//! the server.

pub mod input;
pub mod network;
pub mod rendering;
