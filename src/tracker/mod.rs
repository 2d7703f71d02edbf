//! Request Tracker Module
//!
//! Correlates outbound requests with their eventual responses.
//!
//! ## Responsibilities
//! - Allocate a unique correlation id per request
//! - Hold the pending completion until a response, timeout or failure
//! - Fulfil every completion exactly once
//! - Store poll-mode results until the caller takes them
//!
//! ## Concurrency
//! The id map is sharded; each shard is a `parking_lot::Mutex` plus a
//! `Condvar` for poll waiters. Lookup-and-remove happens under the shard
//! lock, so a racing response, timeout and connection failure can never
//! fulfil the same completion twice. Callbacks run after the lock is
//! released, on the thread that resolved them.

mod table;

use std::fmt;

use crate::protocol::Response;

pub use table::RequestTracker;

/// Identifier of a pooled connection that owns pending requests
pub type ConnectionId = u64;

/// Continuation invoked with the terminal response
pub type Callback = Box<dyn FnOnce(Response) + Send + 'static>;

/// How a caller learns the outcome of a request
pub enum Completion {
    /// Invoke the continuation from the resolving thread
    Callback(Callback),

    /// Park the result until the caller polls for it
    Poll,
}

impl Completion {
    pub fn callback<F>(callback: F) -> Self
    where
        F: FnOnce(Response) + Send + 'static,
    {
        Completion::Callback(Box::new(callback))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Callback(_) => f.write_str("Completion::Callback"),
            Completion::Poll => f.write_str("Completion::Poll"),
        }
    }
}

/// Result of polling for a response
#[derive(Debug)]
pub enum PollOutcome {
    /// The response, handed out exactly once
    Ready(Response),

    /// Still in flight
    NotReady,

    /// No such request: never issued, cancelled, or already taken
    Unknown,
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            PollOutcome::Ready(response) => Some(response),
            _ => None,
        }
    }
}
