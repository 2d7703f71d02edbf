//! Server Module
//!
//! A small in-memory cache service that speaks the client's wire protocol.
//! Used by the integration tests and `protocache-server` for local runs.
//!
//! ## Architecture
//! - Single acceptor thread
//! - One handler thread per connection; requests on a connection are
//!   answered in arrival order
//! - Controls for exercising the client: pause/resume responses, drop every
//!   connection, request counters

mod connection;
mod listener;
mod store;

pub use listener::{CacheServer, ServerOptions};
pub use store::MemoryStore;
