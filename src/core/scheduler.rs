//! The scheduler loop body (spec §4.G): drain the work-queue battery,
//! compute a sleep bound from the nearest timer, poll the backend, refresh
//! the clock, and expire due timers. `Scheduler` borrows every component
//! it touches rather than owning them, so [`crate::core::engine::Engine`]
//! can hand it out per-iteration while still owning the long-lived state.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::backend::Backend;
use crate::core::fiber::FiberExecutor;
use crate::core::mailbox::Mailbox;
use crate::core::signal::SignalSet;
use crate::core::task::Task;
use crate::core::timers::TimerCollection;
use crate::core::wakeup::WakeupTransport;
use crate::core::work_queue::{WorkItem, WorkQueueBattery, WorkQueueClass};
use crate::util::clock::now_ms;

/// One engine-thread-only pass over every event source. Constructed fresh
/// (cheaply — it is all borrows) for each call to
/// [`Scheduler::run_iteration`].
pub struct Scheduler<'a> {
    /// The eight-class battery handlers are popped from.
    pub battery: &'a mut WorkQueueBattery,
    /// The cross-thread mailbox, drained into `battery`'s fast class.
    pub mailbox: &'a Mailbox,
    /// The active wake-up transport. Locked only briefly, around reading
    /// `reader_fd`/draining bytes — never held across [`Backend::poll`],
    /// so a `post`/`signal` call from another thread is never blocked by
    /// the engine thread sitting in a blocking poll.
    pub wakeup: &'a Mutex<Option<WakeupTransport>>,
    /// The self-pipe's reader fd as last known to the engine thread, kept
    /// in sync with `wakeup` so a transport torn down by a cross-thread
    /// write failure (spec §4.B/§7) can still be deregistered from
    /// `backend` here, where the only thread allowed to touch it runs.
    pub self_pipe_fd: &'a mut Option<RawFd>,
    /// Set by the native-post waker when armed; cleared once drained.
    /// Unused when the self-pipe transport is active, since that path
    /// detects a pending drain from the byte stream itself.
    pub post_pending: &'a AtomicBool,
    /// The active readiness backend.
    pub backend: &'a mut dyn Backend,
    /// The fiber-resumption seam (spec §4.G's `_setjmp`/`_longjmp` main
    /// context), if the engine was built with [`crate::core::engine::EngineFlags::fibers`].
    /// `None` means every handler simply runs to completion inline.
    pub fiber: Option<&'a mut dyn FiberExecutor>,
    /// The configured signal table.
    pub signals: &'a SignalSet,
    /// Pending timers.
    pub timers: &'a mut TimerCollection,
    /// The engine's monotonic clock, refreshed every iteration.
    pub now_ms: &'a mut u64,
}

impl<'a> Scheduler<'a> {
    /// Run exactly one pass of the loop body described in spec §4.G.
    /// Returns the number of handlers run during the drain phase, for
    /// diagnostics/tests.
    pub fn run_iteration(&mut self) -> usize {
        let drained = self.drain_phase();

        let timeout = self.timers.nearest_deadline(*self.now_ms);
        self.poll_phase(timeout);

        *self.now_ms = now_ms();
        self.expire_timers_phase();

        drained
    }

    /// Repeatedly pop and run handlers until every class is empty,
    /// following the cursor/fast/round-robin selection rule. Each handler
    /// runs through the fiber seam when one is configured, so an embedder
    /// with a real stackful-coroutine executor can suspend a handler
    /// mid-run instead of this loop always running it to completion.
    fn drain_phase(&mut self) -> usize {
        let mut n = 0;
        while let Some((_, item)) = self.battery.pop_next() {
            match self.fiber.as_deref_mut() {
                Some(fiber) => {
                    let task = item.task;
                    let handler = item.handler;
                    fiber.run(Box::new(move || handler(&task)));
                }
                None => item.invoke(),
            }
            n += 1;
        }
        n
    }

    /// Block in the backend for up to `timeout`, then react to whichever
    /// wake-up source fired. The wake-up transport is locked only to read
    /// `reader_fd` beforehand and to drain it afterwards, never across
    /// the `poll` call itself.
    fn poll_phase(&mut self, timeout: crate::core::backend::PollTimeout) {
        let reader_fd = self.wakeup.lock().as_ref().and_then(|w| w.reader_fd());
        if reader_fd.is_some() {
            *self.self_pipe_fd = reader_fd;
        }

        let ready = match self.backend.poll(timeout) {
            Ok(ready) => ready,
            Err(err) => {
                tracing::error!(crit = true, error = %err, "backend poll failed");
                Vec::new()
            }
        };

        if let Some(reader_fd) = reader_fd {
            if ready.contains(&reader_fd) {
                self.handle_self_pipe_readable();
            }
        } else if self.post_pending.swap(false, Ordering::SeqCst) {
            self.drain_mailbox_into_fast();
        }

        // A cross-thread `post`/`signal` call may have torn the transport
        // down after a hard write error, between the last iteration and
        // this one — that thread had no access to `backend` to deregister
        // the now-dead reader fd. Finish that teardown here, the one place
        // allowed to touch the backend.
        if self.wakeup.lock().is_none() {
            if let Some(fd) = self.self_pipe_fd.take() {
                self.backend.deregister_read_fd(fd);
            }
        }
    }

    /// The self-pipe reader handler (spec §4.B). A hard read error tears
    /// the transport down and deregisters its fd from the backend (spec
    /// §4.B/§7: "close both fds... continue without wake-up transport").
    fn handle_self_pipe_readable(&mut self) {
        let broken = {
            let guard = self.wakeup.lock();
            match guard.as_ref() {
                Some(wakeup) => !run_self_pipe_drain(wakeup, self.mailbox, self.signals, self.battery),
                None => false,
            }
        };
        if broken {
            *self.wakeup.lock() = None;
            if let Some(fd) = self.self_pipe_fd.take() {
                self.backend.deregister_read_fd(fd);
            }
        }
    }

    fn drain_mailbox_into_fast(&mut self) {
        drain_mailbox_into(self.mailbox, self.battery);
    }

    fn expire_timers_phase(&mut self) {
        for callback in self.timers.expire_due(*self.now_ms) {
            self.battery.enqueue(
                WorkQueueClass::Fast,
                WorkItem::new(Task::new(0), move |_task| callback()),
            );
        }
    }
}

/// Read up to 128 bytes per syscall from the self-pipe, classify each as a
/// post (`0`) or a signal number, dispatch signals immediately, and drain
/// the mailbox into `fast` at most once regardless of how many post bytes
/// arrived. Shared between the per-iteration poll phase and
/// [`crate::core::engine::Engine::change`]'s one-shot flush when swapping
/// onto a backend with native signal support. Returns `false` on a hard
/// self-pipe read error, so the caller can tear the transport down.
pub(crate) fn run_self_pipe_drain(
    wakeup: &WakeupTransport,
    mailbox: &Mailbox,
    signals: &SignalSet,
    battery: &mut WorkQueueBattery,
) -> bool {
    let mut post = false;
    let (bytes, ok) = wakeup.drain_reader();
    for byte in bytes {
        if byte == 0 {
            post = true;
        } else {
            signals.dispatch(i32::from(byte));
        }
    }
    if post {
        drain_mailbox_into(mailbox, battery);
    }
    ok
}

pub(crate) fn drain_mailbox_into(mailbox: &Mailbox, battery: &mut WorkQueueBattery) {
    for item in mailbox.drain() {
        battery.enqueue(WorkQueueClass::Fast, item);
    }
}
