//! Configuration for ProtoCache
//!
//! Centralized client configuration with sensible defaults.

use std::time::Duration;

use crate::error::{CacheError, Result};

/// Main configuration for a ProtoCache client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Service Configuration
    // -------------------------------------------------------------------------
    /// Cache service address (host:port)
    ///
    /// A credential provider's endpoint override takes precedence.
    pub endpoint: String,

    // -------------------------------------------------------------------------
    // Request Configuration
    // -------------------------------------------------------------------------
    /// How long a request may stay unresolved before it times out
    pub timeout: Duration,

    /// Ttl applied to `set` calls that don't pass one
    pub default_ttl: Duration,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Number of connections in the pool
    pub connection_count: usize,

    /// TCP connect + handshake timeout
    pub connect_timeout: Duration,

    /// Size of the per-connection read buffer (in bytes)
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:7379".to_string(),
            timeout: Duration::from_secs(15),
            default_ttl: Duration::from_secs(60),
            connection_count: 1,
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 8 * 1024, // 8 KB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the config describes a usable client
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(CacheError::Config("endpoint must not be empty".to_string()));
        }
        if self.connection_count == 0 {
            return Err(CacheError::Config(
                "connection_count must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CacheError::Config("timeout must be non-zero".to_string()));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::Config("default_ttl must be non-zero".to_string()));
        }
        if self.read_buffer_size == 0 {
            return Err(CacheError::Config(
                "read_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the cache service address (host:port)
    pub fn endpoint(mut self, addr: impl Into<String>) -> Self {
        self.config.endpoint = addr.into();
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the request timeout (in milliseconds)
    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    /// Set the default item ttl
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Set the default item ttl (in milliseconds)
    pub fn default_ttl_ms(self, ms: u64) -> Self {
        self.default_ttl(Duration::from_millis(ms))
    }

    /// Set the number of pooled connections
    pub fn connection_count(mut self, count: usize) -> Self {
        self.config.connection_count = count;
        self
    }

    /// Set the connect + handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-connection read buffer size (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
