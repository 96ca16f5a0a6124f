//! Relay server binary.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use relay::{MemoryDirectory, RelayServer, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Lowest port a relay may listen on.
const MIN_PORT: u16 = 1024;

#[derive(Debug, Parser)]
#[command(name = "relay-server", version, about = "Point-to-point text chat relay")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    addr: String,

    /// Port to listen on (1024-65535)
    #[arg(short, long, default_value_t = 7777)]
    port: u32,

    /// Drop connections silent for this many seconds
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let port = match u16::try_from(args.port) {
        Ok(port) if port >= MIN_PORT => port,
        _ => {
            eprintln!("port must be between {MIN_PORT} and 65535, got {}", args.port);
            return ExitCode::FAILURE;
        }
    };

    let config = ServerConfig {
        idle_timeout: args.idle_timeout.map(Duration::from_secs),
        ..ServerConfig::default()
    };
    let bind = format!("{}:{port}", args.addr);

    let server = match RelayServer::builder()
        .bind(&bind)
        .config(config)
        .build(Arc::new(MemoryDirectory::new()))
        .await
    {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(addr = %bind, error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "server stopped");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
