//! ProtoCache Server Binary
//!
//! Runs the in-memory reference cache service.

use std::time::Duration;

use clap::Parser;
use protocache::server::{CacheServer, ServerOptions};
use tracing_subscriber::{fmt, EnvFilter};

/// ProtoCache reference cache service
#[derive(Parser, Debug)]
#[command(name = "protocache-server")]
#[command(about = "In-memory cache service speaking the ProtoCache protocol")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7379")]
    listen: String,

    /// Environment variable holding the token clients must present.
    /// When unset, any non-empty token is accepted.
    #[arg(short, long)]
    token_env: Option<String>,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,protocache=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("ProtoCache Server v{}", protocache::VERSION);

    let token = match &args.token_env {
        Some(name) => match std::env::var(name) {
            Ok(token) => Some(token),
            Err(_) => {
                tracing::error!("{} is not set", name);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("No token configured, accepting any client token");
            None
        }
    };

    let server = match CacheServer::start(&args.listen, ServerOptions { token }) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    // The service runs until the process is killed
    loop {
        std::thread::sleep(Duration::from_secs(60));
        tracing::debug!(
            "{} connections, {} requests served, {} items stored",
            server.active_connections(),
            server.requests_received(),
            server.store().len()
        );
    }
}
