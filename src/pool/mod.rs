//! Connection Pool Module
//!
//! Duplex TCP connections to the cache service.
//!
//! ## Architecture
//! - Fixed number of slots, filled lazily and refilled after a connection dies
//! - Each connection authenticates with its own handshake
//! - One reader thread per connection demultiplexes responses by correlation id
//! - Writes are serialised per connection; many requests share one socket
//!
//! A dead connection fails only the requests it owns (`ConnectionLost`).
//! The next `acquire` on its slot dials a fresh connection.

mod connection;
mod manager;

pub use connection::Connection;
pub use manager::ConnectionPool;
