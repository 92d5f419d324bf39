use clap::Parser;
use log::{info, warn};
use server::config::ServerConfig;
use server::event_log::EventLog;
use server::network::Server;
use shared::{CLIENT_TIMEOUT_SECS, MAX_CLIENTS, REAP_INTERVAL_SECS, TELEMETRY_INTERVAL_SECS};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (positional form: server <port> <log-file>)
    #[arg(value_name = "PORT")]
    port_arg: Option<u16>,

    /// Event log file (positional form)
    #[arg(value_name = "LOG_FILE")]
    log_file_arg: Option<PathBuf>,

    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// File the protocol event log is appended to
    #[arg(short = 'l', long, default_value = "server.log")]
    log_file: PathBuf,

    /// Maximum number of concurrent clients
    #[arg(long, default_value_t = MAX_CLIENTS)]
    max_clients: usize,

    /// Seconds between telemetry broadcasts
    #[arg(long, default_value_t = TELEMETRY_INTERVAL_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    telemetry_interval: u64,

    /// Seconds of inactivity before a client is evicted
    #[arg(long, default_value_t = CLIENT_TIMEOUT_SECS)]
    client_timeout: u64,

    /// Seconds between inactivity sweeps
    #[arg(long, default_value_t = REAP_INTERVAL_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    reap_interval: u64,
}

impl Args {
    fn config(&self) -> ServerConfig {
        let port = self.port_arg.unwrap_or(self.port);
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, port),
            max_clients: self.max_clients,
            telemetry_interval: Duration::from_secs(self.telemetry_interval),
            client_timeout: Duration::from_secs(self.client_timeout),
            reap_interval: Duration::from_secs(self.reap_interval),
        }
    }

    fn log_path(&self) -> PathBuf {
        self.log_file_arg
            .clone()
            .unwrap_or_else(|| self.log_file.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.config();
    let log_path = args.log_path();

    let (events, writer) = EventLog::open(&log_path)?;
    let server = Server::bind(config.clone(), events).await?;

    info!("Telemetry server listening on {}", server.local_addr()?);
    info!("Event log: {}", log_path.display());
    info!(
        "Max clients: {}, telemetry every {:?}, idle timeout {:?}",
        config.max_clients, config.telemetry_interval, config.client_timeout
    );

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
        })
        .await?;

    // The writer finishes once every log handle is gone and the queue is flushed
    if tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .is_err()
    {
        warn!("Event log writer did not finish in time");
    }

    info!("Server closed");
    Ok(())
}
