//! Runtime settings for the telemetry server

use shared::{
    CLIENT_TIMEOUT_SECS, DEFAULT_PORT, MAX_CLIENTS, REAP_INTERVAL_SECS, TELEMETRY_INTERVAL_SECS,
};
use crate::error::ServerError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to, `host:port`
    pub bind_addr: String,
    /// Maximum number of concurrent sessions
    pub max_clients: usize,
    /// Period of the telemetry broadcast
    pub telemetry_interval: Duration,
    /// Idle time after which a session is evicted
    pub client_timeout: Duration,
    /// Period of the inactivity sweep
    pub reap_interval: Duration,
}

impl ServerConfig {
    pub fn with_addr(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    /// Rejects periods the timer tasks cannot tick at
    pub fn validate(&self) -> Result<(), ServerError> {
        for (name, period) in [
            ("telemetry_interval", self.telemetry_interval),
            ("reap_interval", self.reap_interval),
        ] {
            if period.is_zero() {
                return Err(ServerError::ZeroInterval { name });
            }
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_clients: MAX_CLIENTS,
            telemetry_interval: Duration::from_secs(TELEMETRY_INTERVAL_SECS),
            client_timeout: Duration::from_secs(CLIENT_TIMEOUT_SECS),
            reap_interval: Duration::from_secs(REAP_INTERVAL_SECS),
        }
    }
}
