//! Timer integration: a min-heap of deadlines that bounds how long the
//! scheduler loop is allowed to block in `poll`, and that yields due
//! callbacks back onto the fast queue. Same shape as the teacher's
//! `InMemoryQueue` binary heap, reordered on deadline instead of priority.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::core::backend::PollTimeout;

/// A callback run once its deadline has passed.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    deadline_ms: u64,
    // Tie-breaks entries sharing a deadline in insertion order, since
    // `BinaryHeap` is not a stable sort.
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ms, self.seq).cmp(&(other.deadline_ms, other.seq))
    }
}

/// Min-heap of pending deadlines.
#[derive(Default)]
pub struct TimerCollection {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

impl TimerCollection {
    /// Construct an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run once `now_ms()` reaches `deadline_ms`.
    pub fn schedule(&mut self, deadline_ms: u64, callback: impl FnOnce() + Send + 'static) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TimerEntry {
            deadline_ms,
            seq,
            callback: Box::new(callback),
        }));
    }

    /// Number of pending timers, for diagnostics/tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// How long the scheduler's next `poll` may block, given the current
    /// time: zero if a timer is already due, the distance to the nearest
    /// deadline otherwise, or unbounded if nothing is scheduled.
    #[must_use]
    pub fn nearest_deadline(&self, now_ms: u64) -> PollTimeout {
        match self.heap.peek() {
            None => PollTimeout::Infinite,
            Some(Reverse(entry)) if entry.deadline_ms <= now_ms => PollTimeout::Zero,
            Some(Reverse(entry)) => PollTimeout::Millis(entry.deadline_ms - now_ms),
        }
    }

    /// Pop every timer whose deadline has passed, in deadline order.
    pub fn expire_due(&mut self, now_ms: u64) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline_ms > now_ms {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry must pop");
            due.push(entry.callback);
        }
        due
    }
}
