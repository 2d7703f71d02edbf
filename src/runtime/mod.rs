//! Runtime Module
//!
//! Process-wide client handle and the deadline timer.
//!
//! ## Lifecycle
//! 1. `init` builds the client once (pool, tracker, timer) and fails fast on
//!    bad configuration or credentials
//! 2. `client` hands out the shared handle
//! 3. `destroy` drains every pending request with `ShuttingDown` and closes
//!    the connections
//!
//! Requests issued outside that window fail with `NotInitialized`.

mod timer;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::CacheClient;
use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::error::{CacheError, Result};

pub use timer::DeadlineTimer;

static CLIENT: Mutex<Option<Arc<CacheClient>>> = parking_lot::const_mutex(None);

/// Create the process-wide client
///
/// Connecting happens outside the handle lock, so `client` and
/// `is_initialized` stay responsive while the first handshake runs. When
/// two `init` calls race, the first to finish wins and the other client is
/// shut down.
pub fn init(config: Config, credentials: CredentialProvider) -> Result<()> {
    if is_initialized() {
        return Err(CacheError::AlreadyInitialized);
    }

    let client = CacheClient::connect(config, credentials)?;

    let mut handle = CLIENT.lock();
    if handle.is_some() {
        drop(handle);
        client.shutdown();
        return Err(CacheError::AlreadyInitialized);
    }
    *handle = Some(Arc::new(client));
    tracing::info!("Cache client initialized");
    Ok(())
}

/// The process-wide client
pub fn client() -> Result<Arc<CacheClient>> {
    CLIENT.lock().clone().ok_or(CacheError::NotInitialized)
}

pub fn is_initialized() -> bool {
    CLIENT.lock().is_some()
}

/// Shut the process-wide client down
///
/// Handles obtained from `client` stay valid but every request on them
/// fails with `ShuttingDown`.
pub fn destroy() -> Result<()> {
    let client = CLIENT.lock().take().ok_or(CacheError::NotInitialized)?;
    client.shutdown();
    tracing::info!("Cache client destroyed");
    Ok(())
}
