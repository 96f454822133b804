//! # reactor_core
//!
//! A single-threaded, cooperative event engine meant to drive one worker
//! thread of a multi-threaded network server — the same role
//! `nxt_event_engine_t` plays for each worker process in NGINX Unit.
//!
//! The engine itself never touches sockets or protocol state. It owns
//! exactly four things: an eight-class priority work queue, a cross-thread
//! mailbox, a wake-up transport that breaks a blocking `poll`, and a
//! pluggable readiness backend. Application code (accept loops, protocol
//! state machines, connection pools) is expected to live outside this
//! crate and drive itself by enqueuing [`core::WorkItem`]s.
//!
//! ## Core Problem Solved
//!
//! A worker thread that blocks in `epoll_wait`/`kqueue`/`poll` needs a way
//! to be woken from other threads (a listener thread handing off an
//! accepted connection, a signal handler, a timer) without losing FIFO
//! ordering or starving any one class of work:
//!
//! - **Priority without starvation**: eight fixed classes, drained fast
//!   queue first, round-robin across the rest via a persistent cursor.
//! - **Cross-thread handoff**: a lock-protected mailbox is the only
//!   structure any non-engine thread may write to.
//! - **Wake-up without polling**: a backend-native post hook when the
//!   backend offers one, a self-pipe otherwise.
//! - **Hot-swappable backend**: `Engine::change` replaces the readiness
//!   backend without losing queued work or pending signals.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use reactor_core::core::{Engine, EngineFlags, Task, WorkItem, WorkQueueClass};
//! use reactor_core::core::backend::{Backend, PollTimeout};
//!
//! // See the integration tests under `tests/` for complete working
//! // examples against a concrete `Backend` implementation.
//! ```
//!
//! For complete examples, see the integration tests under `tests/`.

#![deny(warnings)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core engine abstractions: work queues, mailbox, wake-up transport,
/// signal bridge, timers, request index, and the engine lifecycle.
pub mod core;
/// Configuration models for the engine and its backend.
pub mod config;
/// Builders to construct an engine from configuration.
pub mod builders;
/// Shared utilities: monotonic clock and telemetry bootstrap.
pub mod util;
