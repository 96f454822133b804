//! The cross-thread mailbox: the only structure any non-engine thread is
//! allowed to write to.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::core::work_queue::WorkItem;

/// A lock-protected FIFO, writable from any thread, drained only by the
/// engine thread. Mirrors `infra::mailbox`'s lock-protected-map shape from
/// the teacher, generalized from a per-key map to a single engine-wide
/// queue since the engine mailbox has no routing key.
#[derive(Default)]
pub struct Mailbox {
    queue: Mutex<VecDeque<WorkItem>>,
}

impl Mailbox {
    /// Construct an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a work item. O(1) under the lock. Callers are responsible
    /// for triggering the wake-up transport afterwards (see
    /// [`crate::core::engine::Engine::post`]).
    pub fn push(&self, item: WorkItem) {
        self.queue.lock().push_back(item);
    }

    /// Drain every pending item in FIFO order. O(n) under the lock; the
    /// lock is held only for the duration of the swap, never while running
    /// handlers.
    pub fn drain(&self) -> VecDeque<WorkItem> {
        let mut guard = self.queue.lock();
        std::mem::take(&mut *guard)
    }

    /// Number of items currently queued, for diagnostics/tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when the mailbox has nothing queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
