//! Request definitions
//!
//! Represents operations issued by callers.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{CacheError, Result};
use super::frame::MAX_PAYLOAD_SIZE;

/// Bytes of fixed fields in a SET payload: cache_len (2) + key_len (4) + ttl (8)
pub(crate) const SET_FIXED_LEN: usize = 14;

/// Bytes of fixed fields in a GET payload: cache_len (2) + key_len (4)
pub(crate) const GET_FIXED_LEN: usize = 6;

/// Request types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Set,
}

/// A cache operation
///
/// Immutable once submitted; key and value are shared `Bytes` so handing the
/// request to the codec never copies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Look up a key
    Get { cache_name: String, key: Bytes },

    /// Store a key-value pair; `ttl: None` means the item never expires
    ///
    /// A ttl below one millisecond is sent as one millisecond.
    Set {
        cache_name: String,
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
    },
}

impl Request {
    pub fn get(cache_name: impl Into<String>, key: impl Into<Bytes>) -> Self {
        Request::Get {
            cache_name: cache_name.into(),
            key: key.into(),
        }
    }

    pub fn set(
        cache_name: impl Into<String>,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Self {
        Request::Set {
            cache_name: cache_name.into(),
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    /// Get the request type
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Get { .. } => RequestKind::Get,
            Request::Set { .. } => RequestKind::Set,
        }
    }

    pub fn cache_name(&self) -> &str {
        match self {
            Request::Get { cache_name, .. } | Request::Set { cache_name, .. } => cache_name,
        }
    }

    pub fn key(&self) -> &Bytes {
        match self {
            Request::Get { key, .. } | Request::Set { key, .. } => key,
        }
    }

    /// Size of the encoded payload
    pub fn payload_len(&self) -> usize {
        match self {
            Request::Get { cache_name, key } => GET_FIXED_LEN + cache_name.len() + key.len(),
            Request::Set {
                cache_name,
                key,
                value,
                ..
            } => SET_FIXED_LEN + cache_name.len() + key.len() + value.len(),
        }
    }

    /// Reject requests that must never reach the wire
    pub fn validate(&self) -> Result<()> {
        let cache_name = self.cache_name();
        if cache_name.is_empty() {
            return Err(CacheError::Validation(
                "cache name must not be empty".to_string(),
            ));
        }
        if cache_name.len() > u16::MAX as usize {
            return Err(CacheError::Validation(format!(
                "cache name too long: {} bytes (max {})",
                cache_name.len(),
                u16::MAX
            )));
        }
        if self.key().is_empty() {
            return Err(CacheError::Validation("key must not be empty".to_string()));
        }
        if let Request::Set { ttl: Some(ttl), .. } = self {
            if ttl.is_zero() {
                return Err(CacheError::Validation(
                    "ttl must be non-zero; pass no ttl for items that never expire".to_string(),
                ));
            }
        }
        if self.payload_len() > MAX_PAYLOAD_SIZE as usize {
            return Err(CacheError::Validation(format!(
                "request too large: {} bytes (max {})",
                self.payload_len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(())
    }
}
