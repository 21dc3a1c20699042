//! Deferred, key-deduplicating notification queue.
//!
//! The host flushes the queue once per tick. Keyed actions coalesce: while an
//! action for a key is pending, further actions for that key are dropped, so
//! a cell written five times in one tick notifies once. Unkeyed actions are
//! always appended.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use tracing::{error, trace, warn};

use crate::error::ReactiveError;
use crate::types::QueueKey;

type Action = Box<dyn FnOnce() -> anyhow::Result<()>>;

struct Task {
    seq: u64,
    key: Option<QueueKey>,
    action: Action,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    pending: HashMap<QueueKey, u64>,
    next_seq: u64,
    cancelled: usize,
}

/// Outcome of one [`NotificationQueue::flush`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Actions that ran and returned `Ok`.
    pub executed: usize,
    /// Actions that ran and returned an error (logged, not propagated).
    pub failed: usize,
    /// Keyed actions cancelled since the previous flush.
    pub cancelled: usize,
    /// The action limit was reached with work still queued.
    pub truncated: bool,
    /// First `CycleDetected` or `ReentrancyLimit` raised by an action.
    /// Also counted in `failed`.
    pub fatal: Option<ReactiveError>,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.executed + self.failed
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

#[derive(Default)]
pub struct NotificationQueue {
    state: RefCell<QueueState>,
    flushing: Cell<bool>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fire-and-forget action.
    pub fn enqueue(&self, action: impl FnOnce() -> anyhow::Result<()> + 'static) {
        self.push(None, Box::new(action));
    }

    /// Appends `action` unless an action for `key` is already pending.
    ///
    /// Returns `false` when the action was coalesced into the pending one.
    pub fn enqueue_keyed(
        &self,
        key: QueueKey,
        action: impl FnOnce() -> anyhow::Result<()> + 'static,
    ) -> bool {
        if self.is_pending(key) {
            trace!(target: "reactive::queue", key = ?key, "coalesced");
            return false;
        }
        self.push(Some(key), Box::new(action));
        true
    }

    fn push(&self, key: Option<QueueKey>, action: Action) {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        if let Some(key) = key {
            state.pending.insert(key, seq);
        }
        state.tasks.push_back(Task { seq, key, action });
    }

    /// Removes the pending action for `key`, if any.
    pub fn cancel(&self, key: QueueKey) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(seq) = state.pending.remove(&key) else {
            return false;
        };
        state.tasks.retain(|task| task.seq != seq);
        state.cancelled += 1;
        trace!(target: "reactive::queue", key = ?key, "cancelled");
        true
    }

    pub fn is_pending(&self, key: QueueKey) -> bool {
        self.state.borrow().pending.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().tasks.is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Drains the queue in FIFO order, running each action exactly once.
    ///
    /// Actions enqueued while flushing run in the same flush. A failing
    /// action is logged and does not stop the rest. At most `max_actions`
    /// actions run; the remainder stays queued. A nested call from inside an
    /// action returns an empty report.
    pub fn flush(&self, max_actions: usize) -> FlushReport {
        if self.flushing.replace(true) {
            warn!(target: "reactive::queue", "nested flush ignored");
            return FlushReport::default();
        }

        let mut report = FlushReport {
            cancelled: std::mem::take(&mut self.state.borrow_mut().cancelled),
            ..FlushReport::default()
        };

        loop {
            if report.total() >= max_actions {
                report.truncated = !self.is_empty();
                if report.truncated {
                    warn!(
                        target: "reactive::queue",
                        limit = max_actions,
                        remaining = self.len(),
                        "flush limit reached, deferring remaining notifications"
                    );
                }
                break;
            }

            let Some(task) = self.pop_front() else {
                break;
            };

            match (task.action)() {
                Ok(()) => report.executed += 1,
                Err(err) => {
                    report.failed += 1;
                    let fatal = ReactiveError::fatal_from(&err);
                    error!(
                        target: "reactive::queue",
                        key = ?task.key,
                        fatal = fatal.is_some(),
                        error = %err,
                        "queued notification failed"
                    );
                    if report.fatal.is_none() {
                        report.fatal = fatal;
                    }
                }
            }
        }

        self.flushing.set(false);
        trace!(
            target: "reactive::queue",
            executed = report.executed,
            failed = report.failed,
            cancelled = report.cancelled,
            truncated = report.truncated,
            fatal = report.is_fatal(),
            "flush complete"
        );
        report
    }

    /// Pops the next task and releases its key so the action may re-enqueue.
    fn pop_front(&self) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        let task = state.tasks.pop_front()?;
        if let Some(key) = task.key
            && state.pending.get(&key) == Some(&task.seq)
        {
            state.pending.remove(&key);
        }
        Some(task)
    }
}
