//! # ProtoCache
//!
//! An asynchronous key-value cache client with:
//! - Correlation-id based request/response protocol
//! - Pooled, multiplexed TCP connections with per-connection handshakes
//! - Callback, poll and blocking calling conventions over one request tracker
//! - Exactly-once completion, even across timeouts and connection loss
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Cache Client                            │
//! │            (callback / poll / blocking calls)                │
//! └──────────┬──────────────────────────────────▲───────────────┘
//!            │ register                         │ resolve
//! ┌──────────▼──────────┐              ┌────────┴────────┐
//! │  Request Tracker    │◄─────────────┤ Deadline Timer  │
//! │ (correlation table) │   cancel     └─────────────────┘
//! └──────────┬──────────┘
//!            │ encode
//! ┌──────────▼──────────┐
//! │     Wire Codec      │
//! │  (frames + CRC32)   │
//! └──────────┬──────────┘
//!            │ send / reader thread
//! ┌──────────▼──────────┐
//! │  Connection Pool    │
//! │ (N TCP connections) │
//! └─────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use protocache::{runtime, Config, CredentialProvider};
//!
//! runtime::init(Config::default(), CredentialProvider::from_env_var("PROTOCACHE_API_KEY"))?;
//! let client = runtime::client()?;
//! client.set("test", "test", "test", None);
//! let response = client.get("test", "test");
//! runtime::destroy()?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod credentials;

pub mod protocol;
pub mod tracker;
pub mod pool;
pub mod client;
pub mod runtime;
pub mod server;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CacheError, Result};
pub use config::Config;
pub use credentials::{CredentialProvider, Credentials};
pub use client::{CacheClient, Submission};
pub use protocol::{CorrelationId, Request, Response, ResponseKind};
pub use tracker::{PollOutcome, RequestTracker};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ProtoCache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
