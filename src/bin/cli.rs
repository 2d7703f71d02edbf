//! ProtoCache CLI Client
//!
//! Command-line interface for issuing cache operations.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam::channel;
use protocache::{
    runtime, CacheClient, CacheError, Config, CredentialProvider, PollOutcome, Response, Submission,
};
use tracing_subscriber::{fmt, EnvFilter};

/// ProtoCache CLI
#[derive(Parser, Debug)]
#[command(name = "protocache-cli")]
#[command(about = "CLI for a ProtoCache cache service")]
#[command(version)]
struct Args {
    /// Service address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7379")]
    endpoint: String,

    /// Environment variable holding the API token
    #[arg(long, default_value = "PROTOCACHE_API_KEY")]
    token_env: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "15000")]
    timeout_ms: u64,

    /// Number of pooled connections
    #[arg(long, default_value = "1")]
    connections: usize,

    /// Default item ttl in milliseconds
    #[arg(long, default_value = "60000")]
    default_ttl_ms: u64,

    /// How to wait for the response
    #[arg(short, long, value_enum, default_value = "blocking")]
    mode: Mode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// Block until the response arrives
    Blocking,
    /// Receive the response through a callback
    Callback,
    /// Poll for the response by correlation id
    Poll,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// Cache name
        cache: String,

        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// Cache name
        cache: String,

        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Item ttl in milliseconds (defaults to --default-ttl-ms)
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let config = Config::builder()
        .endpoint(&args.endpoint)
        .timeout_ms(args.timeout_ms)
        .connection_count(args.connections)
        .default_ttl_ms(args.default_ttl_ms)
        .build();
    let credentials = CredentialProvider::from_env_var(&args.token_env);

    if let Err(e) = runtime::init(config, credentials) {
        eprintln!("[ERROR] failed to initialize client: {}", e);
        return ExitCode::FAILURE;
    }

    let response = match runtime::client() {
        Ok(client) => execute(&client, &args),
        Err(e) => Response::Error(e),
    };
    let ok = report(&args.command, &response);

    if let Err(e) = runtime::destroy() {
        eprintln!("[ERROR] failed to destroy client: {}", e);
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn execute(client: &CacheClient, args: &Args) -> Response {
    let timeout = Duration::from_millis(args.timeout_ms);

    match (&args.command, args.mode) {
        (Commands::Get { cache, key }, Mode::Blocking) => client.get(cache, key.clone()),
        (Commands::Set { cache, key, value, ttl_ms }, Mode::Blocking) => {
            client.set(cache, key.clone(), value.clone(), ttl_ms.map(Duration::from_millis))
        }
        (Commands::Get { cache, key }, Mode::Callback) => {
            let (tx, rx) = channel::bounded(1);
            client.get_with_callback(cache, key.clone(), move |response| {
                let _ = tx.send(response);
            });
            receive(rx, timeout)
        }
        (Commands::Set { cache, key, value, ttl_ms }, Mode::Callback) => {
            let (tx, rx) = channel::bounded(1);
            client.set_with_callback(
                cache,
                key.clone(),
                value.clone(),
                ttl_ms.map(Duration::from_millis),
                move |response| {
                    let _ = tx.send(response);
                },
            );
            receive(rx, timeout)
        }
        (Commands::Get { cache, key }, Mode::Poll) => {
            poll(client, client.get_polled(cache, key.clone()), timeout)
        }
        (Commands::Set { cache, key, value, ttl_ms }, Mode::Poll) => poll(
            client,
            client.set_polled(cache, key.clone(), value.clone(), ttl_ms.map(Duration::from_millis)),
            timeout,
        ),
    }
}

/// Wait for the callback to hand the response over
fn receive(rx: channel::Receiver<Response>, timeout: Duration) -> Response {
    // The client's own deadline fires first; the margin covers scheduling
    match rx.recv_timeout(timeout + Duration::from_secs(1)) {
        Ok(response) => response,
        Err(_) => Response::Error(CacheError::Timeout),
    }
}

/// Poll by correlation id until the response appears or the timeout passes
fn poll(client: &CacheClient, submission: Submission, timeout: Duration) -> Response {
    let id = match submission {
        Submission::Completed(response) => return response,
        Submission::Awaiting(id) => id,
    };
    tracing::info!("operation id: {}", id);

    let started = std::time::Instant::now();
    loop {
        match client.poll_response(id) {
            PollOutcome::Ready(response) => return response,
            PollOutcome::Unknown => return Response::Error(CacheError::Timeout),
            PollOutcome::NotReady => {}
        }
        if started.elapsed() >= timeout {
            // A response racing the deadline is discarded along with the request
            client.cancel(id);
            return Response::Error(CacheError::Timeout);
        }
        std::thread::sleep(Duration::from_micros(10));
    }
}

/// Print the outcome; false on error
fn report(command: &Commands, response: &Response) -> bool {
    match response {
        Response::Hit(value) => {
            println!(
                "[INFO] get hit | raw value: {:?} | string value: {}",
                value.as_ref(),
                String::from_utf8_lossy(value)
            );
            true
        }
        Response::Miss => {
            println!("[INFO] get miss");
            true
        }
        Response::Success => {
            println!("[INFO] set success");
            true
        }
        Response::Error(e) => {
            let op = match command {
                Commands::Get { .. } => "get",
                Commands::Set { .. } => "set",
            };
            eprintln!("[ERROR] {} error: {}", op, e);
            false
        }
    }
}
