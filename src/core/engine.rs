//! Engine lifecycle (spec §4.H): create, hot-swap the backend via
//! `change`, and free. `Engine` owns every component and is the only type
//! the owning thread drives through [`Engine::start`]/[`Engine::run_iterations`];
//! [`crate::core::scheduler::Scheduler`] borrows pieces of it per
//! iteration. Other threads never get a reference to `Engine` itself —
//! doing so would alias the owning thread's `&mut self` loop — they get an
//! [`EngineHandle`] instead, a small `Clone` bundle of the `Arc`s that
//! back post/signal/request-index access.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::backend::Backend;
use crate::core::error::EngineError;
use crate::core::fiber::{FiberExecutor, InlineExecutor};
use crate::core::mailbox::Mailbox;
use crate::core::request_index::{RequestIndex, RequestLink};
use crate::core::scheduler::{drain_mailbox_into, run_self_pipe_drain, Scheduler};
use crate::core::signal::SignalSet;
use crate::core::task::Task;
use crate::core::timers::TimerCollection;
use crate::core::wakeup::WakeupTransport;
use crate::core::work_queue::{WorkItem, WorkQueueBattery, WorkQueueClass};
use crate::util::clock::now_ms;

/// Advisory readiness batch size; `0` means the default of 32 (spec §6).
pub const DEFAULT_BATCH: usize = 32;

/// Engine construction flags (spec §6: only `FIBERS` today).
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineFlags {
    /// Create a fiber main-context, enabling the opaque fiber-resumption
    /// seam. Requires the `fibers` feature to have any effect beyond
    /// bookkeeping.
    pub fibers: bool,
}

/// A single-threaded cooperative multiplexer: one per worker thread.
/// Generic over the payload type stored in request-index links so callers
/// are not forced through a specific connection type.
pub struct Engine<R> {
    task: Task,
    backend: Box<dyn Backend>,
    battery: WorkQueueBattery,
    mailbox: Arc<Mailbox>,
    // Behind a mutex, not because the engine thread needs exclusion on
    // its own account, but so a post/signal from another thread never
    // needs to coincide with the engine thread's `&mut self` loop: the
    // lock is only ever held briefly, never across a blocking `poll`.
    wakeup: Arc<Mutex<Option<WakeupTransport>>>,
    // The self-pipe's reader fd, remembered on the engine thread so that a
    // transport torn down by a cross-thread write failure (which has no
    // access to `backend`) can still be deregistered from it on the next
    // iteration, instead of leaving a stale registration behind.
    self_pipe_fd: Option<RawFd>,
    post_pending: Arc<AtomicBool>,
    signals: Arc<SignalSet>,
    signals_configured: bool,
    signal_pipeline_started: bool,
    timers: TimerCollection,
    requests: Arc<RequestIndex<R>>,
    now_ms: u64,
    batch: usize,
    max_connections: u32,
    fiber: Option<Box<dyn FiberExecutor>>,
    // Cooperative loop-exit flag (spec §5.G/§8): the idiomatic substitute
    // for the original source's `longjmp`-based unwind, which has no safe
    // Rust equivalent. Checked at the top of every `start`/`run_iterations`
    // pass; settable from the engine thread itself or, via `EngineHandle`,
    // from any other thread.
    stop: Arc<AtomicBool>,
}

/// A cloneable, `Send + Sync` (given `R: Send + Sync`) handle to the parts
/// of an [`Engine`] that are meant to be reached from threads other than
/// the one running the scheduler loop: posting work, raising a signal,
/// and reading/writing the request index. Obtain one via [`Engine::handle`]
/// before handing the engine itself off to its owning thread.
pub struct EngineHandle<R> {
    mailbox: Arc<Mailbox>,
    wakeup: Arc<Mutex<Option<WakeupTransport>>>,
    requests: Arc<RequestIndex<R>>,
    stop: Arc<AtomicBool>,
}

impl<R> Clone for EngineHandle<R> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            wakeup: self.wakeup.clone(),
            requests: self.requests.clone(),
            stop: self.stop.clone(),
        }
    }
}

impl<R> EngineHandle<R> {
    /// Thread-safe submission of work from outside the engine thread
    /// (spec §4.B `post`). A hard self-pipe write error tears the
    /// transport down (spec §4.B/§7): the work is still enqueued in the
    /// mailbox, but future posts/signals fail silently until the engine
    /// thread establishes a new transport via [`Engine::change`].
    pub fn post(&self, item: WorkItem) {
        self.mailbox.push(item);
        let mut guard = self.wakeup.lock();
        if let Some(wakeup) = guard.as_ref() {
            if !wakeup.post() {
                *guard = None;
            }
        }
    }

    /// Async-signal-safe delivery of a caught OS signal (spec §6
    /// `signal`). Used as the bridge's entry point; backends advertising
    /// native `signal_support` are expected to invoke the configured
    /// dispatcher directly instead, bypassing this call. See [`Self::post`]
    /// for the transport-teardown behavior on a hard write error.
    pub fn signal(&self, signo: i32) {
        let mut guard = self.wakeup.lock();
        if let Some(wakeup) = guard.as_ref() {
            if !wakeup.raise_signal(signo) {
                *guard = None;
            }
        }
    }

    /// Insert a request link (spec §4.F `add`).
    pub fn request_add(&self, link: RequestLink<R>) {
        self.requests.add(link);
    }

    /// Look up a request link without removing it.
    #[must_use]
    pub fn request_find(&self, req_id: u32) -> Option<Arc<RequestLink<R>>> {
        self.requests.find(req_id)
    }

    /// Remove a request link without returning it.
    pub fn request_remove(&self, req_id: u32) {
        self.requests.remove(req_id);
    }

    /// Atomically remove and return a request link.
    pub fn request_find_remove(&self, req_id: u32) -> Option<Arc<RequestLink<R>>> {
        self.requests.find_remove(req_id)
    }

    /// Request that the owning thread's [`Engine::start`]/
    /// [`Engine::run_iterations`] loop stop after its current iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn events_for(batch: usize) -> usize {
    if batch == 0 {
        DEFAULT_BATCH
    } else {
        batch
    }
}

/// Arm the engine's mailbox-transfer flag on the new backend and return
/// the transport it settled on (spec §4.H step 7 / §4.B "wake-up transport
/// choice").
fn post_init(backend: &mut dyn Backend) -> Result<(WakeupTransport, Arc<AtomicBool>), EngineError> {
    let post_pending = Arc::new(AtomicBool::new(false));
    let flag = post_pending.clone();
    let waker = Arc::new(move || flag.store(true, Ordering::SeqCst));
    let transport = WakeupTransport::establish(backend, waker)?;
    Ok((transport, post_pending))
}

impl<R> Engine<R> {
    /// Create an engine around `backend`, owning it from here on. Any
    /// failure during setup is returned directly; nothing
    /// partially-constructed escapes this function — in Rust, unwinding
    /// "previously allocated resources in reverse order" (spec §4.H) falls
    /// out of RAII, since every local here is dropped on the early return.
    pub fn create(
        task: Task,
        mut backend: Box<dyn Backend>,
        signals: Option<SignalSet>,
        flags: EngineFlags,
        batch: usize,
    ) -> Result<Self, EngineError> {
        let fiber: Option<Box<dyn FiberExecutor>> = if flags.fibers {
            Some(Box::new(InlineExecutor::new()))
        } else {
            None
        };

        let signals_configured = signals.is_some();
        let signals = Arc::new(signals.unwrap_or_default());

        let events = events_for(batch);
        backend.create(4 * events, events)?;

        if signals_configured && backend.signal_support() {
            let dispatch_table = signals.clone();
            backend.enable_signals(Arc::new(move |signo| dispatch_table.dispatch(signo)));
        }
        let signal_pipeline_started = signals_configured && !backend.signal_support();

        let (wakeup, post_pending) = post_init(&mut *backend)?;
        let self_pipe_fd = wakeup.reader_fd();

        Ok(Self {
            task,
            backend,
            battery: WorkQueueBattery::new(),
            mailbox: Arc::new(Mailbox::new()),
            wakeup: Arc::new(Mutex::new(Some(wakeup))),
            self_pipe_fd,
            post_pending,
            signals,
            signals_configured,
            signal_pipeline_started,
            timers: TimerCollection::new(),
            requests: Arc::new(RequestIndex::new()),
            now_ms: now_ms(),
            batch,
            max_connections: u32::MAX,
            fiber,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Hot-swap the backend without losing queued work or pending signals
    /// (spec §4.H `change`).
    pub fn change(&mut self, mut new_backend: Box<dyn Backend>, batch: usize) -> Result<(), EngineError> {
        self.batch = batch;

        // Any pending signal bytes on the outgoing self-pipe must be
        // dispatched before it is torn down, regardless of which way the
        // native-signal-support transition runs. The lock is dropped
        // before `new_backend.create` below, well short of any blocking
        // call.
        {
            let guard = self.wakeup.lock();
            if let Some(wakeup) = guard.as_ref() {
                run_self_pipe_drain(wakeup, &self.mailbox, &self.signals, &mut self.battery);
            }
        }

        // A failure from here on leaves the engine without a working
        // backend (the old one is still intact, but the caller asked to
        // move off it); surface that distinctly from a `create()`-time
        // failure so callers can tell the two apart.
        let events = events_for(batch);
        new_backend
            .create(4 * events, events)
            .map_err(|err| EngineError::BackendSwap(err.to_string()))?;

        if self.signals_configured && new_backend.signal_support() {
            let dispatch_table = self.signals.clone();
            new_backend.enable_signals(Arc::new(move |signo| dispatch_table.dispatch(signo)));
        }

        let (new_wakeup, new_post_pending) = post_init(&mut *new_backend)
            .map_err(|err| EngineError::BackendSwap(err.to_string()))?;
        self.self_pipe_fd = new_wakeup.reader_fd();

        // Defer closing the outgoing self-pipe's fds to a later fast-queue
        // turn, so any work it already queued runs before the fds close.
        let old_wakeup = self.wakeup.lock().take();
        if let Some(old_wakeup) = old_wakeup {
            if let Some(close_item) = old_wakeup.begin_teardown(self.task) {
                self.battery.enqueue(WorkQueueClass::Fast, close_item);
            }
        }

        self.backend = new_backend;
        *self.wakeup.lock() = Some(new_wakeup);
        self.post_pending = new_post_pending;

        if self.signals_configured {
            self.signal_pipeline_started = !self.backend.signal_support();
        }

        Ok(())
    }

    /// Enter the scheduler loop. Runs until a handler calls
    /// [`Engine::request_stop`] (or [`EngineHandle::request_stop`] from
    /// another thread) — there is no safe Rust equivalent of the original
    /// source's `longjmp`-based loop unwind, so a cooperative flag checked
    /// at the top of every iteration is the idiomatic substitute. Callers
    /// wanting a bounded run for tests should use
    /// [`Engine::run_iterations`] instead.
    pub fn start(&mut self) {
        while !self.stop.load(Ordering::SeqCst) {
            self.run_one_iteration();
        }
    }

    /// Run up to `n` scheduler iterations, stopping early if
    /// [`Engine::request_stop`] is called. Exists for tests and embedders
    /// driving the loop manually; `start` is the production entry point.
    pub fn run_iterations(&mut self, n: usize) {
        for _ in 0..n {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            self.run_one_iteration();
        }
    }

    /// Request that [`Engine::start`]/[`Engine::run_iterations`] stop
    /// after the current iteration. Idempotent; callable from the engine
    /// thread itself (e.g. from inside a handler closure that captured the
    /// engine's handle) or from another thread via [`EngineHandle::request_stop`].
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether [`Engine::request_stop`] has been called.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run_one_iteration(&mut self) {
        let mut scheduler = Scheduler {
            battery: &mut self.battery,
            mailbox: &self.mailbox,
            wakeup: &self.wakeup,
            self_pipe_fd: &mut self.self_pipe_fd,
            post_pending: &self.post_pending,
            backend: &mut *self.backend,
            fiber: self.fiber.as_deref_mut(),
            signals: &self.signals,
            timers: &mut self.timers,
            now_ms: &mut self.now_ms,
        };
        scheduler.run_iteration();
    }

    /// Build a cloneable, cross-thread handle for posting work, raising
    /// signals, and touching the request index, decoupled from the
    /// `&mut self` loop `start`/`run_iterations` drives. Call this before
    /// handing the engine to its owning thread.
    #[must_use]
    pub fn handle(&self) -> EngineHandle<R> {
        EngineHandle {
            mailbox: self.mailbox.clone(),
            wakeup: self.wakeup.clone(),
            requests: self.requests.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Thread-safe submission of work from outside the engine thread
    /// (spec §4.B `post`). Equivalent to `self.handle().post(item)`;
    /// provided directly for callers that already hold only `&self` (e.g.
    /// before the engine is handed off to its owning thread).
    pub fn post(&self, item: WorkItem) {
        self.mailbox.push(item);
        let mut guard = self.wakeup.lock();
        if let Some(wakeup) = guard.as_ref() {
            if !wakeup.post() {
                *guard = None;
            }
        }
    }

    /// Async-signal-safe delivery of a caught OS signal (spec §6
    /// `signal`). Used as the bridge's entry point; backends advertising
    /// native `signal_support` are expected to invoke the configured
    /// dispatcher directly instead, bypassing this call. See
    /// [`EngineHandle::post`] for the transport-teardown behavior on a
    /// hard write error.
    pub fn signal(&self, signo: i32) {
        let mut guard = self.wakeup.lock();
        if let Some(wakeup) = guard.as_ref() {
            if !wakeup.raise_signal(signo) {
                *guard = None;
            }
        }
    }

    /// The engine's own monotonic clock, as of the last iteration.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// The task identity this engine runs under.
    #[must_use]
    pub fn task(&self) -> Task {
        self.task
    }

    /// Insert a request link (spec §4.F `add`).
    pub fn request_add(&self, link: RequestLink<R>) {
        self.requests.add(link);
    }

    /// Look up a request link without removing it.
    #[must_use]
    pub fn request_find(&self, req_id: u32) -> Option<Arc<RequestLink<R>>> {
        self.requests.find(req_id)
    }

    /// Remove a request link without returning it.
    pub fn request_remove(&self, req_id: u32) {
        self.requests.remove(req_id);
    }

    /// Atomically remove and return a request link.
    pub fn request_find_remove(&self, req_id: u32) -> Option<Arc<RequestLink<R>>> {
        self.requests.find_remove(req_id)
    }

    /// Connection cap; defaults to `u32::MAX` (spec §4.H step 9).
    #[must_use]
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Lower the connection cap. The cap is advisory bookkeeping;
    /// connection admission itself is out of scope for this crate.
    pub fn set_max_connections(&mut self, max: u32) {
        self.max_connections = max;
    }

    /// Enqueue a handler directly onto a queue class, bypassing the
    /// mailbox. Only valid from the engine thread; application code on
    /// other threads must use [`Engine::post`] instead.
    pub fn enqueue(&mut self, class: WorkQueueClass, item: WorkItem) {
        self.battery.enqueue(class, item);
    }

    /// Drain the mailbox directly into the fast queue, bypassing the
    /// wake-up transport. Used by tests that want deterministic control
    /// over when the fast-queue transfer happens.
    pub fn drain_mailbox_for_test(&mut self) {
        drain_mailbox_into(&self.mailbox, &mut self.battery);
    }

    /// Whether the self-pipe signal pipeline is currently considered
    /// active, for diagnostics/tests.
    #[must_use]
    pub fn signal_pipeline_started(&self) -> bool {
        self.signal_pipeline_started
    }

    /// The advisory batch size last configured.
    #[must_use]
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// The fiber executor, if the engine was created with
    /// [`EngineFlags::fibers`] set.
    pub fn fiber_mut(&mut self) -> Option<&mut dyn FiberExecutor> {
        self.fiber.as_deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{PollTimeout, PostWaker, SignalRaiser};
    use std::os::unix::io::RawFd;

    /// A backend offering native post support, so tests can drive the
    /// mailbox→fast transfer through `post_pending` without needing a real
    /// poll-readiness syscall.
    #[derive(Default)]
    struct StubBackend;

    impl Backend for StubBackend {
        fn create(&mut self, _changes_cap: usize, _events_cap: usize) -> Result<(), EngineError> {
            Ok(())
        }

        fn enable_post(&mut self, waker: PostWaker) -> Result<Option<SignalRaiser>, EngineError> {
            let raiser: SignalRaiser = Arc::new(move |signo| {
                if signo == 0 {
                    waker();
                }
            });
            Ok(Some(raiser))
        }

        fn register_read_fd(&mut self, _fd: RawFd) -> Result<(), EngineError> {
            Ok(())
        }

        fn deregister_read_fd(&mut self, _fd: RawFd) {}

        fn poll(&mut self, _timeout: PollTimeout) -> Result<Vec<RawFd>, EngineError> {
            Ok(Vec::new())
        }
    }

    /// A backend with no native post hook, so the engine falls back to a
    /// self-pipe. Reports every fd it was asked to register as always
    /// ready, which is enough to exercise the self-pipe drain path
    /// without a real poll-readiness syscall.
    #[derive(Default)]
    struct SelfPipeBackend {
        registered: parking_lot::Mutex<Vec<RawFd>>,
    }

    impl Backend for SelfPipeBackend {
        fn create(&mut self, _changes_cap: usize, _events_cap: usize) -> Result<(), EngineError> {
            Ok(())
        }

        fn register_read_fd(&mut self, fd: RawFd) -> Result<(), EngineError> {
            self.registered.lock().push(fd);
            Ok(())
        }

        fn deregister_read_fd(&mut self, fd: RawFd) {
            self.registered.lock().retain(|&r| r != fd);
        }

        fn poll(&mut self, _timeout: PollTimeout) -> Result<Vec<RawFd>, EngineError> {
            Ok(self.registered.lock().clone())
        }
    }

    fn new_engine() -> Engine<()> {
        Engine::create(Task::new(0), Box::new(StubBackend::default()), None, EngineFlags::default(), 0)
            .unwrap()
    }

    #[test]
    fn create_defaults_max_connections_to_u32_max() {
        let engine = new_engine();
        assert_eq!(engine.max_connections(), u32::MAX);
        assert_eq!(engine.batch(), 0);
    }

    #[test]
    fn post_from_another_thread_is_observed_next_iteration() {
        let mut engine = new_engine();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        // `post` is `&self`, so this is legal to call concurrently with
        // the engine thread's own `&mut self` use during a run, not just
        // before it starts — modeled here by calling it before the first
        // iteration, which is the common case (a listener thread handing
        // off work before the worker wakes up).
        engine.post(WorkItem::new(Task::new(0), move |_| {
            flag.store(true, Ordering::SeqCst);
        }));

        engine.run_iterations(1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn signal_without_support_dispatches_through_self_pipe() {
        let mut signals = SignalSet::new();
        let caught = Arc::new(AtomicBool::new(false));
        let flag = caught.clone();
        signals.register(1, "SIGHUP", Arc::new(move |_signo| flag.store(true, Ordering::SeqCst)));

        let mut engine = Engine::create(
            Task::new(0),
            Box::new(SelfPipeBackend::default()),
            Some(signals),
            EngineFlags::default(),
            0,
        )
        .unwrap();

        assert!(engine.signal_pipeline_started());
        engine.signal(1);
        engine.run_iterations(1);
        assert!(caught.load(Ordering::SeqCst));
    }

    #[test]
    fn change_preserves_already_queued_work() {
        let mut engine = new_engine();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        engine.enqueue(
            WorkQueueClass::Accept,
            WorkItem::new(Task::new(0), move |_| flag.store(true, Ordering::SeqCst)),
        );

        engine.change(Box::new(StubBackend::default()), 0).unwrap();
        engine.run_iterations(1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn change_still_wakes_up_after_the_swap() {
        let mut engine = new_engine();
        engine.change(Box::new(StubBackend::default()), 0).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        engine.post(WorkItem::new(Task::new(0), move |_| {
            flag.store(true, Ordering::SeqCst);
        }));
        engine.run_iterations(1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn request_lifecycle_round_trips() {
        let engine: Engine<&'static str> = Engine::create(
            Task::new(0),
            Box::new(StubBackend::default()),
            None,
            EngineFlags::default(),
            0,
        )
        .unwrap();
        engine.request_add(RequestLink { req_id: 7, payload: "conn" });
        assert!(engine.request_find(7).is_some());
        let removed = engine.request_find_remove(7).unwrap();
        assert_eq!(removed.payload, "conn");
        assert!(engine.request_find(7).is_none());
    }

    #[test]
    fn run_iterations_stops_early_once_requested() {
        let mut engine = new_engine();
        assert!(!engine.stop_requested());

        let ran = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = ran.clone();
            engine.post(WorkItem::new(Task::new(0), move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        }
        engine.request_stop();
        assert!(engine.stop_requested());

        // A stop requested before the loop starts means zero iterations
        // run, even with work already queued.
        engine.run_iterations(5);
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn a_handler_can_stop_the_loop_via_the_handle() {
        let mut engine = new_engine();
        let handle = engine.handle();

        engine.post(WorkItem::new(Task::new(0), move |_| {
            handle.request_stop();
        }));

        // The stopping handler's own iteration still completes; the flag
        // is only checked at the top of the *next* iteration.
        engine.run_iterations(10);
        assert!(engine.stop_requested());
    }
}
