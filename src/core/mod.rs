//! Core engine abstractions: the work-queue battery, mailbox, wake-up
//! transport, signal bridge, timers, request index, and the engine
//! lifecycle that ties them together.

pub mod backend;
pub mod engine;
pub mod error;
pub mod fiber;
pub mod mailbox;
pub mod request_index;
pub mod scheduler;
pub mod signal;
pub mod task;
pub mod timers;
pub mod wakeup;
pub mod work_queue;

pub use backend::{Backend, PollTimeout, PostWaker, SignalDispatcher, SignalRaiser};
pub use engine::{Engine, EngineFlags, EngineHandle, DEFAULT_BATCH};
pub use error::{AppResult, EngineError};
pub use fiber::{FiberExecutor, InlineExecutor};
pub use mailbox::Mailbox;
pub use request_index::{RequestIndex, RequestLink};
pub use scheduler::Scheduler;
pub use signal::{SignalEntry, SignalSet};
pub use task::Task;
pub use timers::{TimerCallback, TimerCollection};
pub use wakeup::WakeupTransport;
pub use work_queue::{WorkItem, WorkQueueBattery, WorkQueueClass, ALL_CLASSES, CLASS_COUNT};
