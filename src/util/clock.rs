//! Monotonic clock helpers shared by the timer collection and the engine.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static MONOTONIC_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since an arbitrary, process-local monotonic epoch.
///
/// The engine only ever compares two `now_ms` values taken from the same
/// process, so the exact epoch does not matter; what matters is that the
/// value never goes backwards.
#[must_use]
pub fn now_ms() -> u64 {
    let origin = *MONOTONIC_ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_millis() as u64
}

/// Wall-clock milliseconds since the Unix epoch, used only for audit/log
/// timestamps where a human-meaningful time is wanted.
#[must_use]
pub fn wall_clock_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
