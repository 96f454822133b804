//! The fiber-resumption seam. The original source suspends/resumes work
//! via `_setjmp`/`_longjmp`, which has no safe Rust equivalent; this crate
//! keeps the concept as an opaque, feature-gated trait so a caller with a
//! real stackful-coroutine library (or none at all) can plug in without
//! the scheduler loop knowing the difference.

use std::sync::atomic::{AtomicBool, Ordering};

/// A suspendable unit of work. The default build runs every handler to
/// completion on the engine thread and never suspends; the `fibers`
/// feature exists for embedders that swap in a real implementation.
pub trait FiberExecutor: Send {
    /// Run `body` to completion (or until it voluntarily suspends, for a
    /// real fiber implementation). The default executor always runs to
    /// completion and returns `true`.
    fn run(&mut self, body: Box<dyn FnOnce() + Send>) -> bool;
}

/// The default, non-suspending executor: every work item runs to
/// completion inline. Used whenever the `fibers` feature is not compiled
/// in, and as the engine's executor until a real one is configured.
#[derive(Default)]
pub struct InlineExecutor {
    stopping: AtomicBool,
}

impl InlineExecutor {
    /// Construct a fresh executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cooperative stop flag, checked by the scheduler loop between work
    /// items (spec §4.G: the loop has no preemption, so shutdown is
    /// checked, not forced).
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Whether [`InlineExecutor::request_stop`] has been called.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl FiberExecutor for InlineExecutor {
    fn run(&mut self, body: Box<dyn FnOnce() + Send>) -> bool {
        body();
        true
    }
}

#[cfg(feature = "fibers")]
/// Marker trait for a stackful-coroutine backed executor. No implementation
/// ships in this crate; embedders building with the `fibers` feature
/// provide their own `FiberExecutor` and hand it to
/// [`crate::core::engine::Engine`] instead of [`InlineExecutor`].
pub trait StackfulFiberExecutor: FiberExecutor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_executor_always_completes() {
        let mut exec = InlineExecutor::new();
        let ran = std::sync::Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        assert!(exec.run(Box::new(move || flag.store(true, Ordering::SeqCst))));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_flag_is_observable_after_request() {
        let exec = InlineExecutor::new();
        assert!(!exec.stop_requested());
        exec.request_stop();
        assert!(exec.stop_requested());
    }
}
