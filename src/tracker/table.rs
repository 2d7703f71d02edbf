//! Correlation table
//!
//! Sharded map from correlation id to pending completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::CacheError;
use crate::protocol::{CorrelationId, Response, HANDSHAKE_ID};

use super::{Callback, Completion, ConnectionId, PollOutcome};

/// Number of lock shards (power of two)
const SHARD_COUNT: usize = 16;

/// Upper bound for waits whose deadline would overflow `Instant`
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A request waiting for its outcome
struct PendingCompletion {
    /// When the request was registered
    created_at: Instant,

    /// Connection the request was sent on, if any
    owner: Option<ConnectionId>,

    completion: Completion,
}

#[derive(Default)]
struct Shard {
    /// Unresolved requests
    pending: HashMap<CorrelationId, PendingCompletion>,

    /// Poll-mode results not yet taken
    ready: HashMap<CorrelationId, Response>,
}

#[derive(Default)]
struct ShardSlot {
    state: Mutex<Shard>,

    /// Signalled whenever a poll result lands in `ready`
    ready_signal: Condvar,
}

/// Tracks in-flight requests by correlation id
///
/// ## Concurrency:
/// - `shards`: one Mutex + Condvar per shard, selected by id
/// - `next_id`: Atomic counter (lock-free)
/// - All methods use `&self`; share it behind an `Arc`
pub struct RequestTracker {
    shards: Box<[ShardSlot]>,

    /// Next id to hand out; starts above the handshake id
    next_id: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| ShardSlot::default()).collect();
        Self {
            shards,
            next_id: AtomicU64::new(HANDSHAKE_ID + 1),
        }
    }

    fn shard(&self, id: CorrelationId) -> &ShardSlot {
        &self.shards[(id as usize) & (SHARD_COUNT - 1)]
    }

    // =========================================================================
    // Registration / Fulfilment
    // =========================================================================

    /// Allocate a correlation id and park `completion` under it
    pub fn register(&self, completion: Completion, owner: Option<ConnectionId>) -> CorrelationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingCompletion {
            created_at: Instant::now(),
            owner,
            completion,
        };

        self.shard(id).state.lock().pending.insert(id, pending);
        tracing::trace!(correlation_id = id, owner = ?owner, "Registered request");
        id
    }

    /// Fulfil the request with its response
    ///
    /// Returns false if nothing is pending under `id` (late, duplicate or
    /// already cancelled); the response is dropped.
    pub fn resolve(&self, id: CorrelationId, response: Response) -> bool {
        self.complete(id, response, true)
    }

    /// Give up on a request (timeout)
    ///
    /// Callback completions receive `Error(Timeout)`; poll completions are
    /// removed, the caller that cancels is the one that would have polled.
    /// Returns false if the request was already resolved.
    pub fn cancel(&self, id: CorrelationId) -> bool {
        self.complete(id, Response::Error(CacheError::Timeout), false)
    }

    fn complete(&self, id: CorrelationId, response: Response, store_for_poll: bool) -> bool {
        let slot = self.shard(id);

        let callback: Callback = {
            let mut shard = slot.state.lock();
            let pending = match shard.pending.remove(&id) {
                Some(pending) => pending,
                None => return false,
            };

            tracing::trace!(
                correlation_id = id,
                elapsed = ?pending.created_at.elapsed(),
                outcome = %response.kind(),
                "Request completed"
            );

            match pending.completion {
                Completion::Callback(callback) => callback,
                Completion::Poll => {
                    if store_for_poll {
                        shard.ready.insert(id, response);
                        slot.ready_signal.notify_all();
                    }
                    return true;
                }
            }
        };

        callback(response);
        true
    }

    /// Fail every request owned by a dead connection
    pub fn fail_owned(&self, owner: ConnectionId, err: CacheError) -> usize {
        self.fail_matching(err, |pending| pending.owner == Some(owner))
    }

    /// Fail every outstanding request (shutdown)
    pub fn drain_all(&self, err: CacheError) -> usize {
        self.fail_matching(err, |_| true)
    }

    fn fail_matching<F>(&self, err: CacheError, matches: F) -> usize
    where
        F: Fn(&PendingCompletion) -> bool,
    {
        let mut callbacks = Vec::new();
        let mut failed = 0;

        for slot in self.shards.iter() {
            let mut shard = slot.state.lock();
            let ids: Vec<CorrelationId> = shard
                .pending
                .iter()
                .filter(|(_, pending)| matches(pending))
                .map(|(id, _)| *id)
                .collect();
            if ids.is_empty() {
                continue;
            }

            for id in ids {
                if let Some(pending) = shard.pending.remove(&id) {
                    failed += 1;
                    match pending.completion {
                        Completion::Callback(callback) => callbacks.push(callback),
                        Completion::Poll => {
                            shard.ready.insert(id, Response::Error(err.clone()));
                        }
                    }
                }
            }
            slot.ready_signal.notify_all();
        }

        for callback in callbacks {
            callback(Response::Error(err.clone()));
        }

        if failed > 0 {
            tracing::debug!("Failed {} pending requests: {}", failed, err);
        }
        failed
    }

    // =========================================================================
    // Poll Mode
    // =========================================================================

    /// Take a poll-mode result without blocking
    pub fn try_take(&self, id: CorrelationId) -> PollOutcome {
        let mut shard = self.shard(id).state.lock();
        Self::take_locked(&mut shard, id)
    }

    /// Block until the result is ready or `timeout` elapses
    ///
    /// Returns `NotReady` on timeout; the request stays pending.
    pub fn wait(&self, id: CorrelationId, timeout: Duration) -> PollOutcome {
        let slot = self.shard(id);
        let deadline = Instant::now() + timeout.min(MAX_WAIT);

        let mut shard = slot.state.lock();
        loop {
            match Self::take_locked(&mut shard, id) {
                PollOutcome::NotReady => {}
                outcome => return outcome,
            }
            if slot.ready_signal.wait_until(&mut shard, deadline).timed_out() {
                return Self::take_locked(&mut shard, id);
            }
        }
    }

    fn take_locked(shard: &mut Shard, id: CorrelationId) -> PollOutcome {
        if let Some(response) = shard.ready.remove(&id) {
            PollOutcome::Ready(response)
        } else if shard.pending.contains_key(&id) {
            PollOutcome::NotReady
        } else {
            PollOutcome::Unknown
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of unresolved requests
    pub fn outstanding(&self) -> usize {
        self.shards.iter().map(|slot| slot.state.lock().pending.len()).sum()
    }

    /// Number of poll results waiting to be taken
    pub fn unclaimed(&self) -> usize {
        self.shards.iter().map(|slot| slot.state.lock().ready.len()).sum()
    }

    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.shard(id).state.lock().pending.contains_key(&id)
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}
