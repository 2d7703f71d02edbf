//! Cache Client
//!
//! Public operations on top of the pool, codec and tracker.
//!
//! ## Calling Conventions
//! - **Callback**: `get_with_callback` / `set_with_callback` return at once;
//!   the continuation runs on the connection's reader thread (or inline for
//!   requests rejected before they are sent). Keep it short.
//! - **Poll**: `get_polled` / `set_polled` return a [`Submission`]; poll the
//!   correlation id with `poll_response` or block on it with `wait_response`.
//! - **Blocking**: `get` / `set` wait up to the configured timeout.
//!
//! All three share one [`RequestTracker`], so every request resolves exactly
//! once whichever way the caller listens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::error::{CacheError, Result};
use crate::pool::{Connection, ConnectionPool};
use crate::protocol::{encode_request, CorrelationId, Request, Response};
use crate::runtime::DeadlineTimer;
use crate::tracker::{Callback, Completion, PollOutcome, RequestTracker};

/// Immediate result of a poll-mode submission
#[derive(Debug)]
pub enum Submission {
    /// Rejected before it was sent; no correlation id was allocated
    Completed(Response),

    /// In flight; poll this id
    Awaiting(CorrelationId),
}

impl Submission {
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Submission::Awaiting(id) => Some(*id),
            Submission::Completed(_) => None,
        }
    }
}

/// Asynchronous cache client
///
/// ## Concurrency:
/// - Every method takes `&self`; share the client behind an `Arc`
/// - Caller threads only register and write; responses are resolved on the
///   pool's reader threads and timeouts on the timer thread
pub struct CacheClient {
    config: Config,
    tracker: Arc<RequestTracker>,
    pool: ConnectionPool,
    timer: DeadlineTimer,
    shutting_down: AtomicBool,
}

impl CacheClient {
    /// Build a client and establish its first connection
    ///
    /// Fails on invalid configuration, missing credentials, an unreachable
    /// service, or a rejected token.
    pub fn connect(config: Config, credentials: CredentialProvider) -> Result<Self> {
        config.validate()?;
        credentials.resolve_credentials()?;

        let tracker = Arc::new(RequestTracker::new());
        let timer = DeadlineTimer::start(Arc::clone(&tracker))?;
        let pool = ConnectionPool::new(&config, credentials, Arc::clone(&tracker));

        if let Err(e) = pool.warm_up() {
            tracing::error!("Failed to connect to {}: {}", pool.endpoint(), e);
            timer.shutdown();
            pool.close();
            return Err(e);
        }

        tracing::info!(
            "Connected to {} (connections={}, timeout={:?}, default_ttl={:?})",
            pool.endpoint(),
            config.connection_count,
            config.timeout,
            config.default_ttl
        );

        Ok(Self {
            config,
            tracker,
            pool,
            timer,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of requests still waiting for an outcome
    pub fn outstanding_requests(&self) -> usize {
        self.tracker.outstanding()
    }

    /// Number of pooled connections currently alive
    pub fn live_connections(&self) -> usize {
        self.pool.live_connections()
    }

    // =========================================================================
    // Blocking
    // =========================================================================

    /// Look up `key`, waiting up to the configured timeout
    pub fn get(&self, cache_name: &str, key: impl Into<Bytes>) -> Response {
        let started = Instant::now();
        let submission = self.get_polled(cache_name, key);
        self.await_submission(submission, started)
    }

    /// Store `key`, waiting up to the configured timeout
    ///
    /// `ttl: None` uses the configured default ttl.
    pub fn set(
        &self,
        cache_name: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Response {
        let started = Instant::now();
        let submission = self.set_polled(cache_name, key, value, ttl);
        self.await_submission(submission, started)
    }

    /// Wait out whatever is left of the timeout window opened at `started`
    fn await_submission(&self, submission: Submission, started: Instant) -> Response {
        let id = match submission {
            Submission::Completed(response) => return response,
            Submission::Awaiting(id) => id,
        };

        match self.tracker.wait(id, self.remaining(started)) {
            PollOutcome::Ready(response) => response,
            PollOutcome::NotReady => {
                if self.tracker.cancel(id) {
                    tracing::debug!("Request {} timed out after {:?}", id, self.config.timeout);
                    return Response::Error(CacheError::Timeout);
                }
                // Resolved between the wait and the cancel; that result stands
                self.tracker
                    .try_take(id)
                    .into_response()
                    .unwrap_or(Response::Error(CacheError::Timeout))
            }
            PollOutcome::Unknown => Response::Error(CacheError::Timeout),
        }
    }

    // =========================================================================
    // Callback Mode
    // =========================================================================

    /// Look up `key`; `callback` receives the outcome
    pub fn get_with_callback<F>(&self, cache_name: &str, key: impl Into<Bytes>, callback: F)
    where
        F: FnOnce(Response) + Send + 'static,
    {
        self.submit_with_callback(Request::get(cache_name, key), Box::new(callback));
    }

    /// Store `key`; `callback` receives the outcome
    pub fn set_with_callback<F>(
        &self,
        cache_name: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
        callback: F,
    ) where
        F: FnOnce(Response) + Send + 'static,
    {
        let request = self.set_request(cache_name, key, value, ttl);
        self.submit_with_callback(request, Box::new(callback));
    }

    fn submit_with_callback(&self, request: Request, callback: Callback) {
        let started = Instant::now();
        match self.prepare(&request) {
            Ok(conn) => {
                let id = self.dispatch(&conn, &request, Completion::Callback(callback));
                self.timer.schedule(id, self.remaining(started));
            }
            Err(e) => {
                tracing::debug!("Rejected {:?} request: {}", request.kind(), e);
                callback(Response::Error(e));
            }
        }
    }

    // =========================================================================
    // Poll Mode
    // =========================================================================

    /// Start a lookup; poll the returned id for the outcome
    pub fn get_polled(&self, cache_name: &str, key: impl Into<Bytes>) -> Submission {
        self.submit_polled(Request::get(cache_name, key))
    }

    /// Start a store; poll the returned id for the outcome
    pub fn set_polled(
        &self,
        cache_name: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Submission {
        let request = self.set_request(cache_name, key, value, ttl);
        self.submit_polled(request)
    }

    fn submit_polled(&self, request: Request) -> Submission {
        match self.prepare(&request) {
            Ok(conn) => Submission::Awaiting(self.dispatch(&conn, &request, Completion::Poll)),
            Err(e) => {
                tracing::debug!("Rejected {:?} request: {}", request.kind(), e);
                Submission::Completed(Response::Error(e))
            }
        }
    }

    /// Take the outcome of a poll-mode request without blocking
    ///
    /// A result is handed out once; later polls for the same id return
    /// `Unknown`.
    pub fn poll_response(&self, id: CorrelationId) -> PollOutcome {
        self.tracker.try_take(id)
    }

    /// Block until the outcome is ready or `timeout` elapses
    ///
    /// On `NotReady` the request is still pending; the caller decides whether
    /// to keep waiting or `cancel`.
    pub fn wait_response(&self, id: CorrelationId, timeout: Duration) -> PollOutcome {
        self.tracker.wait(id, timeout)
    }

    /// Abandon a request; a response arriving later is dropped
    ///
    /// Returns false if the request already resolved. A result that was
    /// ready but not yet polled is discarded as well.
    pub fn cancel(&self, id: CorrelationId) -> bool {
        if self.tracker.cancel(id) {
            return true;
        }
        if self.tracker.try_take(id).is_ready() {
            tracing::trace!("Discarded unclaimed result of cancelled request {}", id);
        }
        false
    }

    // =========================================================================
    // Submission Pipeline
    // =========================================================================

    fn remaining(&self, started: Instant) -> Duration {
        self.config.timeout.saturating_sub(started.elapsed())
    }

    fn set_request(
        &self,
        cache_name: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Request {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        Request::set(cache_name, key, value, Some(ttl))
    }

    /// Checks that run before anything is registered
    fn prepare(&self, request: &Request) -> Result<Arc<Connection>> {
        if self.is_shut_down() {
            return Err(CacheError::ShuttingDown);
        }
        request.validate()?;
        self.pool.acquire()
    }

    /// Register, encode and send; failures from here on go through the tracker
    fn dispatch(&self, conn: &Connection, request: &Request, completion: Completion) -> CorrelationId {
        let id = self.tracker.register(completion, Some(conn.id()));

        let sent = encode_request(id, request).and_then(|frame| conn.send(&frame));
        if let Err(e) = sent {
            tracing::debug!("Request {} failed before reaching the service: {}", id, e);
            self.tracker.resolve(id, Response::Error(e));
        }
        id
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Fail every pending request with `ShuttingDown` and close the pool
    ///
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = self.tracker.drain_all(CacheError::ShuttingDown);
        self.timer.shutdown();
        self.pool.close();

        tracing::info!("Cache client shut down ({} pending requests drained)", drained);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

impl Drop for CacheClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
