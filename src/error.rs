//! Error types for ProtoCache
//!
//! Provides a unified error type for all operations. Errors are cloneable
//! because they travel inside [`Response::Error`](crate::protocol::Response)
//! to every completion they fail.

use std::sync::Arc;
use thiserror::Error;

/// Result type alias using CacheError
pub type Result<T> = std::result::Result<T, CacheError>;

/// Unified error type for ProtoCache operations
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request timed out")]
    Timeout,

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("No connection available: {0}")]
    NoConnection(String),

    // -------------------------------------------------------------------------
    // Credential Errors
    // -------------------------------------------------------------------------
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    // -------------------------------------------------------------------------
    // Service Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Service(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Client is shutting down")]
    ShuttingDown,

    #[error("Client not initialized")]
    NotInitialized,

    #[error("Client already initialized")]
    AlreadyInitialized,
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}
