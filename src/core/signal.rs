//! The signal bridge: maps a caught OS signal number to the handler
//! configured for it, independent of whether delivery arrived through the
//! self-pipe or a signal-capable backend.

use std::sync::Arc;

/// One configured signal, paired with the handler to run when it fires.
#[derive(Clone)]
pub struct SignalEntry {
    /// The OS signal number (e.g. `SIGHUP`, `SIGTERM`).
    pub signo: i32,
    /// Stable name used only for diagnostics/tracing.
    pub name: &'static str,
    /// Invoked on the engine thread with the signal number.
    pub handler: Arc<dyn Fn(i32) + Send + Sync>,
}

/// The configured signal table, consulted by the dispatcher on every
/// delivery. A `Vec` rather than a map: the table is tiny (single digits of
/// entries) and built once at configuration time, so linear lookup is both
/// simpler and at least as fast as hashing.
#[derive(Default, Clone)]
pub struct SignalSet {
    entries: Vec<SignalEntry>,
}

impl SignalSet {
    /// Construct an empty signal table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `signo`, overwriting any previous handler
    /// for the same number.
    pub fn register(&mut self, signo: i32, name: &'static str, handler: Arc<dyn Fn(i32) + Send + Sync>) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.signo == signo) {
            existing.name = name;
            existing.handler = handler;
        } else {
            self.entries.push(SignalEntry { signo, name, handler });
        }
    }

    /// The signal numbers configured, in registration order.
    #[must_use]
    pub fn signos(&self) -> Vec<i32> {
        self.entries.iter().map(|e| e.signo).collect()
    }

    /// Look up the entry for `signo`, if configured.
    #[must_use]
    pub fn find(&self, signo: i32) -> Option<&SignalEntry> {
        self.entries.iter().find(|e| e.signo == signo)
    }

    /// Dispatch a delivered signal: run its handler if configured, else log
    /// and discard. Mirrors the original source's `nxt_event_engine_signal`:
    /// an unconfigured signal arriving through the bridge is not a bug in
    /// the caller, just a race against reconfiguration, so it is dropped
    /// rather than panicking the engine thread.
    pub fn dispatch(&self, signo: i32) {
        match self.find(signo) {
            Some(entry) => (entry.handler)(signo),
            None => tracing::error!(crit = true, signo, "signal delivered with no configured handler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn dispatch_runs_the_matching_handler() {
        let mut set = SignalSet::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen1 = seen.clone();
        set.register(1, "SIGHUP", Arc::new(move |signo| seen1.lock().push(signo)));
        let seen2 = seen.clone();
        set.register(15, "SIGTERM", Arc::new(move |signo| seen2.lock().push(signo)));

        set.dispatch(15);
        set.dispatch(1);

        assert_eq!(*seen.lock(), vec![15, 1]);
    }

    #[test]
    fn dispatch_on_unconfigured_signal_is_a_no_op() {
        let set = SignalSet::new();
        set.dispatch(9); // must not panic
    }

    #[test]
    fn re_registering_replaces_the_handler() {
        let mut set = SignalSet::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        set.register(2, "SIGINT", Arc::new(|_| {}));
        let c = count.clone();
        set.register(2, "SIGINT", Arc::new(move |_| {
            c.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));

        set.dispatch(2);
        assert_eq!(count.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(set.signos(), vec![2]);
    }
}
