//! Error types for the telemetry server

use std::path::PathBuf;
use thiserror::Error;

/// Fatal failures surfaced to the operator
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open event log {}: {source}", path.display())]
    EventLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("maximum of {capacity} clients reached")]
    CapacityExceeded { capacity: usize },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleError {
    #[error("Maximum speed reached")]
    AtMaximum,

    #[error("Minimum speed reached")]
    AtMinimum,
}
