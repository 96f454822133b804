//! The work-queue battery: eight fixed-priority FIFO queues backed by a
//! shared node cache, plus the priority/round-robin selection rule used by
//! the scheduler loop.

use std::collections::VecDeque;

use crate::core::task::Task;

/// One of the eight fixed priority classes, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum WorkQueueClass {
    /// Privileged, always-drained-first class: mailbox drains, post
    /// callbacks, and dispatched signals land here.
    Fast = 0,
    /// New inbound connections accepted by a listener.
    Accept = 1,
    /// Completed reads on an established connection.
    Read = 2,
    /// Generic socket-state transitions.
    Socket = 3,
    /// Completed outbound connect attempts.
    Connect = 4,
    /// Completed writes on an established connection.
    Write = 5,
    /// Graceful connection shutdown.
    Shutdown = 6,
    /// Final connection teardown.
    Close = 7,
}

/// Total number of priority classes.
pub const CLASS_COUNT: usize = 8;

/// All classes in priority order, for iteration and diagnostics.
pub const ALL_CLASSES: [WorkQueueClass; CLASS_COUNT] = [
    WorkQueueClass::Fast,
    WorkQueueClass::Accept,
    WorkQueueClass::Read,
    WorkQueueClass::Socket,
    WorkQueueClass::Connect,
    WorkQueueClass::Write,
    WorkQueueClass::Shutdown,
    WorkQueueClass::Close,
];

impl WorkQueueClass {
    /// Stable, human-readable name used only for diagnostics/tracing.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Accept => "accept",
            Self::Read => "read",
            Self::Socket => "socket",
            Self::Connect => "connect",
            Self::Write => "write",
            Self::Shutdown => "shutdown",
            Self::Close => "close",
        }
    }

    const fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Fast,
            1 => Self::Accept,
            2 => Self::Read,
            3 => Self::Socket,
            4 => Self::Connect,
            5 => Self::Write,
            6 => Self::Shutdown,
            _ => Self::Close,
        }
    }
}

/// A handler bound to the task it runs under. The C source's
/// `(handler, task, obj, data)` four-tuple is collapsed into a closure
/// capturing `obj`/`data`, which is the idiomatic Rust translation.
pub struct WorkItem {
    /// The task identity this handler executes under.
    pub task: Task,
    /// The handler itself, run to completion by the scheduler loop.
    pub handler: Box<dyn FnOnce(&Task) + Send>,
}

impl WorkItem {
    /// Build a work item from a task identity and a handler closure.
    pub fn new(task: Task, handler: impl FnOnce(&Task) + Send + 'static) -> Self {
        Self {
            task,
            handler: Box::new(handler),
        }
    }

    /// Run the handler to completion.
    pub fn invoke(self) {
        (self.handler)(&self.task);
    }
}

/// Free-list pool of work-item slots shared by all eight queues, standing
/// in for the C source's `nxt_work_queue_cache`: enqueue takes a slot from
/// here instead of allocating fresh storage; pop returns the slot once the
/// item has been handed off.
#[derive(Default)]
struct NodeCache {
    slots: Vec<Option<WorkItem>>,
    free: Vec<usize>,
}

impl NodeCache {
    fn take(&mut self, item: WorkItem) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(item);
            idx
        } else {
            self.slots.push(Some(item));
            self.slots.len() - 1
        }
    }

    fn release(&mut self, idx: usize) -> WorkItem {
        let item = self.slots[idx]
            .take()
            .expect("node cache slot released twice");
        self.free.push(idx);
        item
    }
}

/// The eight-queue battery with shared node cache and the drain cursor
/// used by the scheduler loop's selection rule.
pub struct WorkQueueBattery {
    cache: NodeCache,
    queues: [VecDeque<usize>; CLASS_COUNT],
    /// Index of `current_work_queue`; starts pointing at `Fast`.
    current: usize,
}

impl Default for WorkQueueBattery {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueueBattery {
    /// Construct an empty battery with the cursor on `Fast`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: NodeCache::default(),
            queues: Default::default(),
            current: 0,
        }
    }

    /// Enqueue a work item onto the named class. O(1) amortized; the item
    /// is stored in a cache slot rather than a fresh heap node when one is
    /// free.
    pub fn enqueue(&mut self, class: WorkQueueClass, item: WorkItem) {
        let idx = self.cache.take(item);
        self.queues[class as usize].push_back(idx);
    }

    /// Pop the head of a specific class, if non-empty.
    pub fn pop_class(&mut self, class: WorkQueueClass) -> Option<WorkItem> {
        let idx = self.queues[class as usize].pop_front()?;
        Some(self.cache.release(idx))
    }

    /// Current depth of a class, for diagnostics/tests.
    #[must_use]
    pub fn len(&self, class: WorkQueueClass) -> usize {
        self.queues[class as usize].len()
    }

    /// True when every class is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// The class the drain cursor currently points at.
    #[must_use]
    pub fn current_class(&self) -> WorkQueueClass {
        WorkQueueClass::from_index(self.current)
    }

    /// Select and pop the next work item per the engine's priority rule
    /// (spec §4.G step 1):
    ///
    /// 1. Pop from the cursor's class if non-empty.
    /// 2. Else pop from `Fast` if non-empty (cursor unchanged).
    /// 3. Else round-robin forward from the class after the cursor through
    ///    `Close`, wrapping to `Fast`, advancing the cursor on every step,
    ///    until a non-empty class is found or the search returns to the
    ///    cursor's original class; on total emptiness the cursor resets to
    ///    `Fast` and `None` is returned.
    pub fn pop_next(&mut self) -> Option<(WorkQueueClass, WorkItem)> {
        let last = self.current;

        if let Some(item) = self.pop_class(WorkQueueClass::from_index(last)) {
            return Some((WorkQueueClass::from_index(last), item));
        }

        if last != 0 {
            if let Some(item) = self.pop_class(WorkQueueClass::Fast) {
                return Some((WorkQueueClass::Fast, item));
            }
        }

        let mut idx = last;
        loop {
            idx = (idx + 1) % CLASS_COUNT;
            self.current = idx;

            if let Some(item) = self.pop_class(WorkQueueClass::from_index(idx)) {
                return Some((WorkQueueClass::from_index(idx), item));
            }

            if idx == last {
                self.current = 0;
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn marker(order: Arc<parking_lot::Mutex<Vec<&'static str>>>, label: &'static str) -> WorkItem {
        WorkItem::new(Task::new(0), move |_task| {
            order.lock().push(label);
        })
    }

    #[test]
    fn fast_drains_before_everything_else() {
        let mut battery = WorkQueueBattery::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        battery.enqueue(WorkQueueClass::Accept, marker(order.clone(), "A"));
        battery.enqueue(WorkQueueClass::Close, marker(order.clone(), "C"));
        battery.enqueue(WorkQueueClass::Fast, marker(order.clone(), "F"));
        battery.enqueue(WorkQueueClass::Read, marker(order.clone(), "R"));

        while let Some((_, item)) = battery.pop_next() {
            item.invoke();
        }

        assert_eq!(*order.lock(), vec!["F", "A", "R", "C"]);
    }

    #[test]
    fn round_robin_resumes_after_cursor_class() {
        let mut battery = WorkQueueBattery::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Force the cursor onto `write` by draining one item from it first.
        battery.enqueue(WorkQueueClass::Write, marker(order.clone(), "seed"));
        assert_eq!(battery.pop_next().unwrap().0, WorkQueueClass::Write);

        battery.enqueue(WorkQueueClass::Read, marker(order.clone(), "R1"));
        battery.enqueue(WorkQueueClass::Write, marker(order.clone(), "W1"));
        battery.enqueue(WorkQueueClass::Accept, marker(order.clone(), "A1"));

        order.lock().clear();

        while let Some((_, item)) = battery.pop_next() {
            item.invoke();
        }

        assert_eq!(*order.lock(), vec!["W1", "A1", "R1"]);
    }

    #[test]
    fn empty_battery_resets_cursor_to_fast() {
        let mut battery = WorkQueueBattery::new();
        battery.enqueue(WorkQueueClass::Close, marker(
            Arc::new(parking_lot::Mutex::new(Vec::new())),
            "only",
        ));
        assert!(battery.pop_next().is_some());
        assert!(battery.pop_next().is_none());
        assert_eq!(battery.current_class(), WorkQueueClass::Fast);
    }

    #[test]
    fn node_cache_reuses_released_slots() {
        let mut battery = WorkQueueBattery::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..100 {
            let counter = counter.clone();
            battery.enqueue(
                WorkQueueClass::Fast,
                WorkItem::new(Task::new(i), move |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                }),
            );
            battery.pop_next().unwrap().1.invoke();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(WorkQueueClass::Fast.name(), "fast");
        assert_eq!(WorkQueueClass::Close.name(), "close");
        assert_eq!(ALL_CLASSES.len(), CLASS_COUNT);
    }

}
