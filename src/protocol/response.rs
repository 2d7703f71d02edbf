//! Response definitions
//!
//! The terminal outcome of a request.

use std::fmt;

use bytes::Bytes;

use crate::error::CacheError;

/// Response kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Hit,
    Miss,
    Success,
    Error,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseKind::Hit => "Hit",
            ResponseKind::Miss => "Miss",
            ResponseKind::Success => "Success",
            ResponseKind::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Outcome of a single request
#[derive(Debug, Clone)]
pub enum Response {
    /// Key present (GET)
    Hit(Bytes),

    /// Key absent (GET)
    Miss,

    /// Value stored (SET)
    Success,

    /// Request failed, locally or at the service
    Error(CacheError),
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Hit(_) => ResponseKind::Hit,
            Response::Miss => ResponseKind::Miss,
            Response::Success => ResponseKind::Success,
            Response::Error(_) => ResponseKind::Error,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Response::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Response::Miss)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Value of a hit
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Response::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CacheError> {
        match self {
            Response::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CacheError> for Response {
    fn from(err: CacheError) -> Self {
        Response::Error(err)
    }
}
