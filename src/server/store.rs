//! In-memory store
//!
//! Named caches of byte keys with optional expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::protocol::{Request, Response};

/// A stored value and its expiry
#[derive(Debug, Clone)]
struct StoredItem {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredItem {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Cache name -> key -> item
///
/// Caches spring into existence on first write; lookups in an unknown cache
/// are misses.
#[derive(Debug, Default)]
pub struct MemoryStore {
    caches: RwLock<HashMap<String, HashMap<Bytes, StoredItem>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute a request and build the response the service sends back
    pub fn execute(&self, request: Request) -> Response {
        match request {
            Request::Get { cache_name, key } => match self.get(&cache_name, &key) {
                Some(value) => Response::Hit(value),
                None => Response::Miss,
            },
            Request::Set {
                cache_name,
                key,
                value,
                ttl,
            } => {
                self.set(cache_name, key, value, ttl);
                Response::Success
            }
        }
    }

    /// Get a live value; expired items are purged on the way
    pub fn get(&self, cache_name: &str, key: &[u8]) -> Option<Bytes> {
        let now = Instant::now();
        {
            let caches = self.caches.read();
            let item = caches.get(cache_name)?.get(key)?;
            if !item.is_expired(now) {
                return Some(item.value.clone());
            }
        }

        let mut caches = self.caches.write();
        if let Some(cache) = caches.get_mut(cache_name) {
            if cache.get(key).map_or(false, |item| item.is_expired(now)) {
                cache.remove(key);
            }
        }
        None
    }

    /// Store a value; `ttl: None` never expires
    pub fn set(&self, cache_name: String, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.caches
            .write()
            .entry(cache_name)
            .or_default()
            .insert(key, StoredItem { value, expires_at });
    }

    /// Number of stored items, expired ones included
    pub fn len(&self) -> usize {
        self.caches.read().values().map(|cache| cache.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
