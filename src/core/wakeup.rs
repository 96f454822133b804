//! The wake-up transport: how a thread other than the engine's own, or a
//! signal handler, gets the engine out of a blocking poll. Two forms exist,
//! selected once at engine creation time and preserved across `change()`
//! (spec §4.B/§4.C): a backend-native post hook when the backend offers
//! one, otherwise a self-pipe.

use std::os::unix::io::RawFd;

use crate::core::backend::{Backend, PostWaker, SignalRaiser};
use crate::core::error::EngineError;
use crate::core::task::Task;
use crate::core::work_queue::WorkItem;

/// Either transport the engine uses to break out of a blocking poll.
pub enum WakeupTransport {
    /// The backend armed its own wake-up mechanism via
    /// [`Backend::enable_post`] and handed back a thread-safe raiser; no
    /// fds are owned here.
    NativePost(SignalRaiser),
    /// No native mechanism was available; a self-pipe was opened and its
    /// reader registered with the backend for read-readiness.
    SelfPipe(self_pipe::SelfPipe),
}

impl WakeupTransport {
    /// Try the backend's native post hook first; fall back to a self-pipe.
    pub fn establish(backend: &mut dyn Backend, waker: PostWaker) -> Result<Self, EngineError> {
        if let Some(raiser) = backend.enable_post(waker)? {
            return Ok(Self::NativePost(raiser));
        }

        let pipe = self_pipe::SelfPipe::open()?;
        backend.register_read_fd(pipe.reader_fd())?;
        Ok(Self::SelfPipe(pipe))
    }

    /// Wake the engine to drain the mailbox (byte `0` on the self-pipe,
    /// the raiser called with `0` on a native backend). Safe to call from
    /// any thread, including concurrently with the engine thread's own use
    /// of the backend. Returns `false` on a hard self-pipe write error, in
    /// which case the caller must drop this transport (spec §4.B/§7: the
    /// engine continues without a wake-up transport, future posts/signals
    /// fail silently rather than re-attempting a broken pipe).
    #[must_use]
    pub fn post(&self) -> bool {
        match self {
            Self::NativePost(raiser) => {
                raiser(0);
                true
            }
            Self::SelfPipe(pipe) => pipe.write_byte(0),
        }
    }

    /// Wake the engine to dispatch a caught signal. Only used when the
    /// backend does not advertise [`Backend::signal_support`] — that case
    /// bypasses this transport entirely and calls the dispatcher directly.
    /// Returns `false` on a hard self-pipe write error; see [`Self::post`].
    #[must_use]
    pub fn raise_signal(&self, signo: i32) -> bool {
        match self {
            Self::NativePost(raiser) => {
                raiser(signo);
                true
            }
            Self::SelfPipe(pipe) => pipe.write_byte(u8::try_from(signo).unwrap_or(u8::MAX)),
        }
    }

    /// The self-pipe's reader fd, if this transport owns one.
    #[must_use]
    pub fn reader_fd(&self) -> Option<RawFd> {
        match self {
            Self::NativePost(_) => None,
            Self::SelfPipe(pipe) => Some(pipe.reader_fd()),
        }
    }

    /// Drain pending bytes. Each byte is `0` (mailbox post) or a signal
    /// number. A no-op for `NativePost`, whose wake-ups arrive through the
    /// registered callback instead of a byte stream. The second element is
    /// `false` on a hard self-pipe read error, in which case the caller
    /// must drop this transport (see [`Self::post`]).
    #[must_use]
    pub fn drain_reader(&self) -> (Vec<u8>, bool) {
        match self {
            Self::NativePost(_) => (Vec::new(), true),
            Self::SelfPipe(pipe) => pipe.drain(),
        }
    }

    /// Hand back a work item that closes the self-pipe's fds, if this
    /// transport owns one. The caller (the engine) enqueues the item on
    /// `Fast` so the close happens on a later turn rather than mid-poll.
    /// The old backend is being discarded wholesale alongside it, so
    /// there is nothing to deregister first. `NativePost` owns nothing to
    /// tear down.
    pub fn begin_teardown(self, task: Task) -> Option<WorkItem> {
        match self {
            Self::NativePost(_) => None,
            Self::SelfPipe(pipe) => Some(pipe.close_work_item(task)),
        }
    }
}

/// Raw self-pipe plumbing, isolated behind a private module so the
/// `unsafe` FFI surface is as small and auditable as possible.
mod self_pipe {
    use std::os::unix::io::RawFd;

    use libc::c_void;

    use crate::core::error::EngineError;
    use crate::core::task::Task;
    use crate::core::work_queue::WorkItem;

    /// A non-blocking reader / blocking writer pair used purely to wake a
    /// blocking `poll`. Never carries application payload, only single
    /// bytes: `0` means "drain the mailbox", anything else is a signal
    /// number.
    pub struct SelfPipe {
        reader: RawFd,
        writer: RawFd,
    }

    impl SelfPipe {
        pub fn open() -> Result<Self, EngineError> {
            let mut fds = [0_i32; 2];
            // SAFETY: fds points at two valid i32 slots; pipe2 either fills
            // both or returns -1 without touching them.
            let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
            if rc != 0 {
                return Err(EngineError::Setup(format!(
                    "pipe2 failed: {}",
                    std::io::Error::last_os_error()
                )));
            }

            let (reader, writer) = (fds[0], fds[1]);

            // The writer must block: post()/raise_signal() callers must
            // never silently lose a wake-up byte under backpressure. Only
            // the reader stays non-blocking.
            // SAFETY: writer was just created by the pipe2 call above and
            // is not shared with any other code yet.
            let flags = unsafe { libc::fcntl(writer, libc::F_GETFL) };
            let cleared = flags >= 0
                && unsafe { libc::fcntl(writer, libc::F_SETFL, flags & !libc::O_NONBLOCK) } >= 0;
            if !cleared {
                let err = std::io::Error::last_os_error();
                // SAFETY: both fds are owned exclusively here and have not
                // been closed yet.
                unsafe {
                    libc::close(reader);
                    libc::close(writer);
                }
                return Err(EngineError::Setup(format!("fcntl failed: {err}")));
            }

            Ok(Self { reader, writer })
        }

        #[must_use]
        pub fn reader_fd(&self) -> RawFd {
            self.reader
        }

        /// Write one byte, retrying on `EINTR`. The writer is blocking, so
        /// this never spins on `EAGAIN`. Returns `false` on a hard write
        /// error (logged once here at CRIT); the caller is responsible for
        /// tearing the transport down so the failure is not re-logged on
        /// every subsequent post.
        #[must_use]
        pub fn write_byte(&self, byte: u8) -> bool {
            let buf = [byte];
            loop {
                // SAFETY: writer is valid for the lifetime of `self`; buf
                // is a live 1-byte buffer.
                let rc = unsafe { libc::write(self.writer, buf.as_ptr().cast::<c_void>(), 1) };
                if rc >= 0 {
                    return true;
                }
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    tracing::error!(crit = true, error = %err, "self-pipe write failed");
                    return false;
                }
            }
        }

        /// Drain every byte currently available, up to 128 bytes per
        /// syscall, matching the original source's fixed read buffer.
        /// Returns the bytes read plus `false` on a hard read error (logged
        /// once here at CRIT), so the caller can tear the transport down
        /// instead of re-polling a broken fd forever.
        #[must_use]
        pub fn drain(&self) -> (Vec<u8>, bool) {
            let mut out = Vec::new();
            let mut buf = [0_u8; 128];
            loop {
                // SAFETY: reader is valid for the lifetime of `self`; buf
                // is exactly 128 bytes.
                let rc =
                    unsafe { libc::read(self.reader, buf.as_mut_ptr().cast::<c_void>(), buf.len()) };
                if rc > 0 {
                    let n = rc as usize;
                    out.extend_from_slice(&buf[..n]);
                    if n < buf.len() {
                        return (out, true);
                    }
                    continue;
                }
                if rc == 0 {
                    return (out, true);
                }
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return (out, true);
                }
                if err.kind() != std::io::ErrorKind::Interrupted {
                    tracing::error!(crit = true, error = %err, "self-pipe read failed");
                    return (out, false);
                }
            }
        }

        /// Consume the pipe into a work item that closes both fds when
        /// invoked.
        pub fn close_work_item(self, task: Task) -> WorkItem {
            WorkItem::new(task, move |_task| drop(self))
        }
    }

    impl Drop for SelfPipe {
        fn drop(&mut self) {
            // SAFETY: both fds are owned exclusively by this struct and
            // have not been closed before this point.
            unsafe {
                libc::close(self.reader);
                libc::close(self.writer);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn write_then_drain_roundtrips() {
            let pipe = SelfPipe::open().unwrap();
            assert!(pipe.write_byte(0));
            assert!(pipe.write_byte(9));
            assert_eq!(pipe.drain(), (vec![0, 9], true));
        }

        #[test]
        fn drain_with_nothing_pending_is_empty() {
            let pipe = SelfPipe::open().unwrap();
            assert_eq!(pipe.drain(), (Vec::new(), true));
        }

        #[test]
        fn reader_fd_is_stable() {
            let pipe = SelfPipe::open().unwrap();
            let fd = pipe.reader_fd();
            assert_eq!(pipe.reader_fd(), fd);
        }

        #[test]
        fn write_reports_failure_on_a_closed_writer() {
            let pipe = SelfPipe::open().unwrap();
            // SAFETY: closes only the writer fd, which this test owns
            // exclusively and does not touch again except through
            // `write_byte` below (whose own `close` on drop then targets an
            // already-invalid fd, which is a harmless EBADF, not UB).
            unsafe {
                libc::close(pipe.writer);
            }
            assert!(!pipe.write_byte(0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{PollTimeout, SignalDispatcher};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct NativeBackend {
        last_signal: Arc<AtomicBool>,
    }

    impl Backend for NativeBackend {
        fn create(&mut self, _changes_cap: usize, _events_cap: usize) -> Result<(), EngineError> {
            Ok(())
        }

        fn enable_post(&mut self, waker: PostWaker) -> Result<Option<SignalRaiser>, EngineError> {
            let last_signal = self.last_signal.clone();
            let raiser: SignalRaiser = Arc::new(move |signo| {
                last_signal.store(true, Ordering::SeqCst);
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

    #[derive(Default)]
    struct NoPostBackend {
        registered: Mutex<Vec<RawFd>>,
    }

    impl Backend for NoPostBackend {
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
            Ok(Vec::new())
        }
    }

    #[test]
    fn native_backend_skips_self_pipe() {
        let mut backend = NativeBackend::default();
        let woke = Arc::new(AtomicBool::new(false));
        let flag = woke.clone();
        let transport =
            WakeupTransport::establish(&mut backend, Arc::new(move || flag.store(true, Ordering::SeqCst)))
                .unwrap();

        assert!(matches!(transport, WakeupTransport::NativePost(_)));
        assert!(transport.reader_fd().is_none());

        assert!(transport.post());
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn fallback_backend_gets_self_pipe() {
        let mut backend = NoPostBackend::default();
        let transport = WakeupTransport::establish(&mut backend, Arc::new(|| {})).unwrap();

        assert!(transport.reader_fd().is_some());
        assert_eq!(backend.registered.lock().len(), 1);

        assert!(transport.post());
        assert!(transport.raise_signal(2));
        assert_eq!(transport.drain_reader(), (vec![0, 2], true));

        let item = transport.begin_teardown(crate::core::task::Task::new(0)).unwrap();
        // The old backend is discarded wholesale, not individually
        // deregistered from, so the fd stays listed here.
        assert_eq!(backend.registered.lock().len(), 1);
        item.invoke();
    }

    #[allow(dead_code)]
    fn assert_signal_dispatcher_is_send_sync(_: SignalDispatcher) {}
}
