use clap::Parser;
use client::network::Client;
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// User name to authenticate with on connect
    #[arg(short = 'u', long, requires = "password")]
    user: Option<String>,

    /// Password for --user
    #[arg(long, requires = "user")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let mut client = Client::connect(&args.server).await?;
    println!("Connected to {}", client.server_addr());

    if let (Some(user), Some(password)) = (&args.user, &args.password) {
        if !client.authenticate(user, password).await? {
            warn!("Continuing without vehicle control");
        }
    }

    client.run(tokio::io::stdin()).await?;

    info!("Client closed");
    Ok(())
}
