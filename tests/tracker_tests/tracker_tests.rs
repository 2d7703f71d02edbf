//! Request Tracker Tests
//!
//! Tests for correlation id allocation and exactly-once completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel;
use protocache::protocol::HANDSHAKE_ID;
use protocache::tracker::Completion;
use protocache::{CacheError, PollOutcome, RequestTracker, Response};

// =============================================================================
// Helper Functions
// =============================================================================

/// Register a callback that counts how often it runs and forwards the response
fn counting_callback(
    tracker: &RequestTracker,
    owner: Option<u64>,
) -> (u64, Arc<AtomicUsize>, channel::Receiver<Response>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::unbounded();

    let counter = Arc::clone(&calls);
    let id = tracker.register(
        Completion::callback(move |response| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(response);
        }),
        owner,
    );
    (id, calls, rx)
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_ids_are_unique_and_skip_handshake_id() {
    let tracker = RequestTracker::new();

    let ids: Vec<u64> = (0..100).map(|_| tracker.register(Completion::Poll, None)).collect();

    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 100);
    assert!(!ids.contains(&HANDSHAKE_ID));
    assert_eq!(tracker.outstanding(), 100);
}

#[test]
fn test_ids_unique_across_threads() {
    let tracker = Arc::new(RequestTracker::new());
    let mut handles = vec![];

    for _ in 0..8 {
        let tracker = Arc::clone(&tracker);
        handles.push(thread::spawn(move || {
            (0..500)
                .map(|_| tracker.register(Completion::Poll, None))
                .collect::<Vec<_>>()
        }));
    }

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8 * 500);
}

// =============================================================================
// Callback Completion Tests
// =============================================================================

#[test]
fn test_callback_resolves_once() {
    let tracker = RequestTracker::new();
    let (id, calls, rx) = counting_callback(&tracker, None);

    assert!(tracker.resolve(id, Response::Hit(Bytes::from_static(b"v"))));
    assert!(!tracker.resolve(id, Response::Miss));
    assert!(!tracker.cancel(id));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(rx.recv().unwrap().is_hit());
    assert_eq!(tracker.outstanding(), 0);
}

#[test]
fn test_cancel_delivers_timeout_to_callback() {
    let tracker = RequestTracker::new();
    let (id, calls, rx) = counting_callback(&tracker, None);

    assert!(tracker.cancel(id));
    // Late response is dropped
    assert!(!tracker.resolve(id, Response::Success));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(rx.recv().unwrap(), Response::Error(CacheError::Timeout)));
}

#[test]
fn test_resolve_unknown_id_is_ignored() {
    let tracker = RequestTracker::new();
    assert!(!tracker.resolve(12345, Response::Miss));
    assert!(!tracker.cancel(12345));
    assert_eq!(tracker.unclaimed(), 0);
}

#[test]
fn test_callback_may_reenter_tracker() {
    let tracker = Arc::new(RequestTracker::new());
    let (tx, rx) = channel::bounded(1);

    let inner = Arc::clone(&tracker);
    let id = tracker.register(
        Completion::callback(move |_| {
            // Runs outside the shard lock, so this must not deadlock
            let follow_up = inner.register(Completion::Poll, None);
            tx.send(follow_up).unwrap();
        }),
        None,
    );

    tracker.resolve(id, Response::Success);
    let follow_up = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(tracker.is_pending(follow_up));
}

// =============================================================================
// Poll Completion Tests
// =============================================================================

#[test]
fn test_poll_result_taken_once() {
    let tracker = RequestTracker::new();
    let id = tracker.register(Completion::Poll, None);

    assert!(matches!(tracker.try_take(id), PollOutcome::NotReady));

    tracker.resolve(id, Response::Success);
    assert_eq!(tracker.unclaimed(), 1);

    match tracker.try_take(id) {
        PollOutcome::Ready(response) => assert!(response.is_success()),
        other => panic!("Expected ready outcome, got {:?}", other),
    }
    assert!(matches!(tracker.try_take(id), PollOutcome::Unknown));
    assert_eq!(tracker.unclaimed(), 0);
}

#[test]
fn test_cancelled_poll_request_is_forgotten() {
    let tracker = RequestTracker::new();
    let id = tracker.register(Completion::Poll, None);

    assert!(tracker.cancel(id));
    assert!(!tracker.resolve(id, Response::Success));
    assert!(matches!(tracker.try_take(id), PollOutcome::Unknown));
    assert_eq!(tracker.unclaimed(), 0);
}

#[test]
fn test_wait_times_out_and_leaves_request_pending() {
    let tracker = RequestTracker::new();
    let id = tracker.register(Completion::Poll, None);

    let start = Instant::now();
    let outcome = tracker.wait(id, Duration::from_millis(50));
    assert!(matches!(outcome, PollOutcome::NotReady));
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(tracker.is_pending(id));
}

#[test]
fn test_wait_wakes_on_resolve() {
    let tracker = Arc::new(RequestTracker::new());
    let id = tracker.register(Completion::Poll, None);

    let resolver = Arc::clone(&tracker);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        resolver.resolve(id, Response::Hit(Bytes::from_static(b"late")));
    });

    match tracker.wait(id, Duration::from_secs(5)) {
        PollOutcome::Ready(response) => {
            assert_eq!(response.value(), Some(&Bytes::from_static(b"late")))
        }
        other => panic!("Expected ready outcome, got {:?}", other),
    }
    handle.join().unwrap();
}

#[test]
fn test_wait_unknown_id_returns_immediately() {
    let tracker = RequestTracker::new();
    let start = Instant::now();
    assert!(matches!(
        tracker.wait(999, Duration::from_secs(5)),
        PollOutcome::Unknown
    ));
    assert!(start.elapsed() < Duration::from_secs(1));
}

// =============================================================================
// Bulk Failure Tests
// =============================================================================

#[test]
fn test_fail_owned_only_touches_owner() {
    let tracker = RequestTracker::new();
    let (lost_cb, lost_calls, lost_rx) = counting_callback(&tracker, Some(1));
    let lost_poll = tracker.register(Completion::Poll, Some(1));
    let (kept_cb, kept_calls, _kept_rx) = counting_callback(&tracker, Some(2));
    let unowned = tracker.register(Completion::Poll, None);

    assert_eq!(tracker.fail_owned(1, CacheError::ConnectionLost), 2);

    assert_eq!(lost_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        lost_rx.recv().unwrap(),
        Response::Error(CacheError::ConnectionLost)
    ));
    match tracker.try_take(lost_poll) {
        PollOutcome::Ready(Response::Error(CacheError::ConnectionLost)) => {}
        other => panic!("Expected ConnectionLost, got {:?}", other),
    }

    assert_eq!(kept_calls.load(Ordering::SeqCst), 0);
    assert!(tracker.is_pending(kept_cb));
    assert!(tracker.is_pending(unowned));
    assert!(!tracker.resolve(lost_cb, Response::Success));
}

#[test]
fn test_drain_all_fails_everything() {
    let tracker = RequestTracker::new();
    let (_, calls, rx) = counting_callback(&tracker, Some(1));
    let polled = tracker.register(Completion::Poll, None);

    assert_eq!(tracker.drain_all(CacheError::ShuttingDown), 2);
    assert_eq!(tracker.outstanding(), 0);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        rx.recv().unwrap(),
        Response::Error(CacheError::ShuttingDown)
    ));
    assert!(matches!(
        tracker.try_take(polled),
        PollOutcome::Ready(Response::Error(CacheError::ShuttingDown))
    ));

    // Nothing left to drain
    assert_eq!(tracker.drain_all(CacheError::ShuttingDown), 0);
}

#[test]
fn test_drain_wakes_waiters() {
    let tracker = Arc::new(RequestTracker::new());
    let id = tracker.register(Completion::Poll, None);

    let waiter = Arc::clone(&tracker);
    let handle = thread::spawn(move || waiter.wait(id, Duration::from_secs(10)));

    thread::sleep(Duration::from_millis(20));
    tracker.drain_all(CacheError::ShuttingDown);

    let outcome = handle.join().unwrap();
    assert!(matches!(
        outcome,
        PollOutcome::Ready(Response::Error(CacheError::ShuttingDown))
    ));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_racing_resolve_cancel_and_failure_complete_once() {
    let tracker = Arc::new(RequestTracker::new());
    let mut entries = Vec::new();
    for _ in 0..200 {
        entries.push(counting_callback(&tracker, Some(7)));
    }
    let ids: Arc<Vec<u64>> = Arc::new(entries.iter().map(|(id, _, _)| *id).collect());

    let mut handles = vec![];
    {
        let tracker = Arc::clone(&tracker);
        let ids = Arc::clone(&ids);
        handles.push(thread::spawn(move || {
            for id in ids.iter() {
                tracker.resolve(*id, Response::Success);
            }
        }));
    }
    {
        let tracker = Arc::clone(&tracker);
        let ids = Arc::clone(&ids);
        handles.push(thread::spawn(move || {
            for id in ids.iter().rev() {
                tracker.cancel(*id);
            }
        }));
    }
    {
        let tracker = Arc::clone(&tracker);
        handles.push(thread::spawn(move || {
            tracker.fail_owned(7, CacheError::ConnectionLost);
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    tracker.drain_all(CacheError::ShuttingDown);

    for (_, calls, rx) in &entries {
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }
    assert_eq!(tracker.outstanding(), 0);
}

#[test]
fn test_concurrent_register_and_resolve() {
    let tracker = Arc::new(RequestTracker::new());
    let delivered = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::unbounded::<u64>();

    // One resolver, like a connection reader thread
    let resolver = {
        let tracker = Arc::clone(&tracker);
        thread::spawn(move || {
            for id in rx {
                tracker.resolve(id, Response::Success);
            }
        })
    };

    let mut producers = vec![];
    for _ in 0..4 {
        let tracker = Arc::clone(&tracker);
        let delivered = Arc::clone(&delivered);
        let tx = tx.clone();
        producers.push(thread::spawn(move || {
            for _ in 0..250 {
                let delivered = Arc::clone(&delivered);
                let id = tracker.register(
                    Completion::callback(move |response| {
                        assert!(response.is_success());
                        delivered.fetch_add(1, Ordering::SeqCst);
                    }),
                    None,
                );
                tx.send(id).unwrap();
            }
        }));
    }
    drop(tx);

    for producer in producers {
        producer.join().unwrap();
    }
    resolver.join().unwrap();

    assert_eq!(delivered.load(Ordering::SeqCst), 1000);
    assert_eq!(tracker.outstanding(), 0);
}
