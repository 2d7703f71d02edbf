//! Credential Provider
//!
//! Supplies the bearer token presented during each connection handshake.
//! The token is resolved every time a connection is established, so a
//! rotated environment variable is picked up on reconnect.

use std::fmt;
use std::sync::Arc;

use crate::error::{CacheError, Result};

type TokenFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Where the token comes from
#[derive(Clone)]
enum TokenSource {
    /// A literal token
    Static(String),

    /// Read from an environment variable at resolve time
    EnvVar(String),

    /// Caller-supplied lookup
    Custom(TokenFn),
}

/// Resolved credentials for one handshake
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Source of credentials plus an optional endpoint override
#[derive(Clone)]
pub struct CredentialProvider {
    source: TokenSource,
    endpoint_override: Option<String>,
}

impl CredentialProvider {
    /// Use a literal token
    pub fn from_string(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
            endpoint_override: None,
        }
    }

    /// Read the token from an environment variable
    pub fn from_env_var(name: impl Into<String>) -> Self {
        Self {
            source: TokenSource::EnvVar(name.into()),
            endpoint_override: None,
        }
    }

    /// Look the token up with a closure; `None` means no token is available
    pub fn from_fn<F>(lookup: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Self {
            source: TokenSource::Custom(Arc::new(lookup)),
            endpoint_override: None,
        }
    }

    /// Connect to this endpoint instead of the configured one
    pub fn with_endpoint_override(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    /// Endpoint override, if any
    pub fn endpoint_override(&self) -> Option<&str> {
        self.endpoint_override.as_deref()
    }

    /// Resolve the bearer token
    ///
    /// Fails with `MissingCredentials` if the source yields nothing or a
    /// blank string.
    pub fn resolve_credentials(&self) -> Result<Credentials> {
        let token = match &self.source {
            TokenSource::Static(token) => Some(token.clone()),
            TokenSource::EnvVar(name) => std::env::var(name).ok(),
            TokenSource::Custom(lookup) => lookup(),
        };

        match token {
            Some(token) if !token.trim().is_empty() => Ok(Credentials { token }),
            _ => Err(CacheError::MissingCredentials(self.describe_source())),
        }
    }

    fn describe_source(&self) -> String {
        match &self.source {
            TokenSource::Static(_) => "empty token".to_string(),
            TokenSource::EnvVar(name) => format!("environment variable {} is not set", name),
            TokenSource::Custom(_) => "token lookup returned nothing".to_string(),
        }
    }
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            TokenSource::Static(_) => "static".to_string(),
            TokenSource::EnvVar(name) => format!("env:{}", name),
            TokenSource::Custom(_) => "custom".to_string(),
        };
        f.debug_struct("CredentialProvider")
            .field("source", &source)
            .field("endpoint_override", &self.endpoint_override)
            .finish()
    }
}
