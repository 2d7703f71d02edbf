//! Pool Manager
//!
//! Hands out connections round-robin and replaces dead ones.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::error::{CacheError, Result};
use crate::tracker::RequestTracker;

use super::Connection;

/// Fixed-size pool of connections to one endpoint
///
/// ## Concurrency:
/// - `slots`: one Mutex per slot; held while dialing so a slot is never
///   filled twice
/// - `next_slot` / `next_connection_id`: Atomic counters (lock-free)
pub struct ConnectionPool {
    /// Client configuration (timeouts, buffer sizes)
    config: Config,

    /// Address every connection dials
    endpoint: String,

    /// Token source, consulted on every handshake
    credentials: CredentialProvider,

    /// Shared with every reader thread
    tracker: Arc<RequestTracker>,

    /// Live or empty connection slots
    slots: Box<[Mutex<Option<Arc<Connection>>>]>,

    next_slot: AtomicUsize,
    next_connection_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create an empty pool; nothing is dialed until `acquire` or `warm_up`
    pub fn new(config: &Config, credentials: CredentialProvider, tracker: Arc<RequestTracker>) -> Self {
        let endpoint = credentials
            .endpoint_override()
            .unwrap_or(config.endpoint.as_str())
            .to_string();
        let slots = (0..config.connection_count.max(1))
            .map(|_| Mutex::new(None))
            .collect();

        Self {
            config: config.clone(),
            endpoint,
            credentials,
            tracker,
            slots,
            next_slot: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Establish the first connection now so credential problems surface early
    pub fn warm_up(&self) -> Result<()> {
        self.acquire_slot(0).map(|_| ())
    }

    /// Get a live connection, dialing one if the chosen slot is empty or dead
    pub fn acquire(&self) -> Result<Arc<Connection>> {
        let index = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.acquire_slot(index)
    }

    fn acquire_slot(&self, index: usize) -> Result<Arc<Connection>> {
        if self.is_closed() {
            return Err(CacheError::ShuttingDown);
        }

        let mut slot = self.slots[index].lock();
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(Arc::clone(conn));
            }
            tracing::debug!(
                "Slot {} lost connection {}, reconnecting to {}",
                index,
                conn.id(),
                self.endpoint
            );
        }

        let conn = self.connect()?;
        if self.is_closed() {
            conn.close();
            return Err(CacheError::ShuttingDown);
        }

        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn connect(&self) -> Result<Arc<Connection>> {
        let credentials = self.credentials.resolve_credentials()?;
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        Connection::establish(
            id,
            &self.endpoint,
            &credentials,
            &self.config,
            Arc::clone(&self.tracker),
        )
    }

    /// Close every connection and refuse further acquires
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        for slot in self.slots.iter() {
            let conn = slot.lock().take();
            if let Some(conn) = conn {
                conn.close();
                conn.join_reader();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Address the pool dials
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of slots holding a live connection
    pub fn live_connections(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().as_ref().map_or(false, |conn| !conn.is_closed()))
            .count()
    }
}
