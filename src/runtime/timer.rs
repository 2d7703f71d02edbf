//! Deadline Timer
//!
//! Races a deadline against every callback-mode request. When a deadline
//! passes, the tracker entry is cancelled; if the response won the race
//! the cancel is a no-op.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::Result;
use crate::protocol::CorrelationId;
use crate::tracker::RequestTracker;

enum TimerCommand {
    Schedule {
        deadline: Instant,
        id: CorrelationId,
    },
    Shutdown,
}

/// Background thread that cancels requests whose deadline passed
pub struct DeadlineTimer {
    sender: Sender<TimerCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlineTimer {
    /// Spawn the timer thread
    pub fn start(tracker: Arc<RequestTracker>) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let handle = thread::Builder::new()
            .name("protocache-timer".to_string())
            .spawn(move || run(receiver, tracker))?;

        Ok(Self {
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Cancel `id` once `timeout` has elapsed
    pub fn schedule(&self, id: CorrelationId, timeout: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + Duration::from_secs(86_400));
        if self.sender.send(TimerCommand::Schedule { deadline, id }).is_err() {
            tracing::debug!("Timer stopped, request {} has no deadline", id);
        }
    }

    /// Stop the timer thread; pending deadlines are discarded
    pub fn shutdown(&self) {
        let _ = self.sender.send(TimerCommand::Shutdown);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run(receiver: Receiver<TimerCommand>, tracker: Arc<RequestTracker>) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, CorrelationId)>> = BinaryHeap::new();

    loop {
        // Fire everything that is due
        let now = Instant::now();
        while let Some(&Reverse((deadline, id))) = deadlines.peek() {
            if deadline > now {
                break;
            }
            deadlines.pop();
            if tracker.cancel(id) {
                tracing::debug!("Request {} timed out", id);
            }
        }

        let command = match deadlines.peek() {
            Some(&Reverse((deadline, _))) => match receiver.recv_deadline(deadline) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            TimerCommand::Schedule { deadline, id } => deadlines.push(Reverse((deadline, id))),
            TimerCommand::Shutdown => break,
        }
    }

    tracing::trace!("Timer stopped with {} deadlines pending", deadlines.len());
}
