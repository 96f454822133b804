//! Shared utilities: monotonic clock and telemetry bootstrap.

pub mod clock;
pub mod telemetry;

pub use clock::{now_ms, wall_clock_ms};
pub use telemetry::init_tracing;
