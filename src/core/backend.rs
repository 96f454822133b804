//! The pluggable readiness-backend abstraction (spec §9: "was a
//! function-pointer struct"). Concrete OS backends (epoll, kqueue, poll,
//! IOCP, …) are external collaborators and not implemented here; this
//! module defines the capability interface the engine programs against,
//! plus small reference backends used by the engine's own test suite.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::core::error::EngineError;

/// How long [`Backend::poll`] is allowed to block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTimeout {
    /// Return immediately if nothing is ready.
    Zero,
    /// Block for at most this many milliseconds.
    Millis(u64),
    /// Block until something is ready, with no deadline.
    Infinite,
}

/// Backend-native wake-up callback, registered via [`Backend::enable_post`].
/// Invoking it performs the mailbox→fast transfer (spec §4.B).
pub type PostWaker = Arc<dyn Fn() + Send + Sync>;

/// Dispatcher callback registered via [`Backend::enable_signals`], invoked
/// by backends that advertise [`Backend::signal_support`].
pub type SignalDispatcher = Arc<dyn Fn(i32) + Send + Sync>;

/// A thread-safe, idempotent wake-up callable handed back by
/// [`Backend::enable_post`] when it arms native wake-up. `signo == 0`
/// means "drain the mailbox"; non-zero is a signal number. Calling it is
/// documented as async-signal-safe and concurrency-safe with respect to
/// the engine thread's own `&mut self` use of the backend — it is the one
/// capability of a `Backend` meant to be invoked from any thread.
pub type SignalRaiser = Arc<dyn Fn(i32) + Send + Sync>;

/// Capability interface a readiness backend must implement. Equivalent to
/// `nxt_event_interface_t` in the original source.
pub trait Backend: Send {
    /// (Re)initialize internal backend state sized for `changes_cap`
    /// pending changes and `events_cap` readiness events per poll.
    fn create(&mut self, changes_cap: usize, events_cap: usize) -> Result<(), EngineError>;

    /// Whether this backend delivers OS signals directly to the signal
    /// dispatcher registered via [`Backend::enable_signals`], bypassing
    /// the self-pipe signal bridge entirely.
    fn signal_support(&self) -> bool {
        false
    }

    /// Register a backend-native post/wake-up hook. `waker` performs the
    /// mailbox→fast transfer and is safe to call from the engine thread
    /// only (e.g. from inside the backend's own `poll`). Returns
    /// `Ok(Some(raiser))` if the backend armed native wake-up (the engine
    /// will then skip allocating a self-pipe) — `raiser` is the
    /// thread-safe callable embedders use in place of a self-pipe write;
    /// `Ok(None)` if this backend has no such capability.
    fn enable_post(&mut self, waker: PostWaker) -> Result<Option<SignalRaiser>, EngineError> {
        let _ = waker;
        Ok(None)
    }

    /// Install the signal dispatcher. Only called when [`Backend::signal_support`]
    /// is `true`; the backend is then expected to invoke it directly
    /// whenever it observes a delivered signal, without engine involvement.
    fn enable_signals(&mut self, dispatcher: SignalDispatcher) {
        let _ = dispatcher;
    }

    /// Register an extra fd for read-readiness. The engine only ever
    /// registers its self-pipe reader this way — all other fd/event
    /// registration belongs to protocol logic out of scope for this
    /// crate.
    fn register_read_fd(&mut self, fd: RawFd) -> Result<(), EngineError>;

    /// Deregister a previously-registered fd.
    fn deregister_read_fd(&mut self, fd: RawFd);

    /// Block for up to `timeout`. Must not block longer. Returns the
    /// subset of registered fds that became readable.
    fn poll(&mut self, timeout: PollTimeout) -> Result<Vec<RawFd>, EngineError>;
}
