//! The request index: a concurrent map from a 32-bit request ID to the
//! request↔connection link, readable from any thread but written only by
//! the engine thread. The original multi-level hash keyed on a Murmur2
//! digest; this crate uses `dashmap` instead, which the spec's grounding
//! explicitly allows for any equivalently-performant concurrent map keyed
//! on the 32-bit ID.

use std::sync::Arc;

use dashmap::DashMap;

/// An entry inserted into the request index: the request ID plus whatever
/// payload the caller needs to reach from it. Kept generic so callers are
/// not forced through a specific connection type.
pub struct RequestLink<T> {
    /// The 32-bit request identifier this link is keyed on.
    pub req_id: u32,
    /// Caller-defined payload (e.g. a connection handle).
    pub payload: T,
}

/// Concurrent request-ID → link map. Single-writer (the engine thread),
/// multi-reader.
pub struct RequestIndex<T> {
    map: DashMap<u32, Arc<RequestLink<T>>>,
}

impl<T> Default for RequestIndex<T> {
    fn default() -> Self {
        Self { map: DashMap::new() }
    }
}

impl<T> RequestIndex<T> {
    /// Construct an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a link. Duplicates are not allowed: on a colliding `req_id`
    /// the existing entry is left untouched and a WARN is logged, mirroring
    /// the original's `lhq.replace = 0` insert policy.
    pub fn add(&self, link: RequestLink<T>) {
        let req_id = link.req_id;
        match self.map.entry(req_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                tracing::warn!(req_id, "request index insert collided: entry left unchanged");
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(link));
            }
        }
    }

    /// Look up a link without removing it.
    #[must_use]
    pub fn find(&self, req_id: u32) -> Option<Arc<RequestLink<T>>> {
        self.map.get(&req_id).map(|entry| entry.value().clone())
    }

    /// Remove a link without returning it. Logs a WARN on miss.
    pub fn remove(&self, req_id: u32) {
        if self.map.remove(&req_id).is_none() {
            tracing::warn!(req_id, "request index remove missed: no such entry");
        }
    }

    /// Atomically remove and return a link. Logs a WARN on miss.
    pub fn find_remove(&self, req_id: u32) -> Option<Arc<RequestLink<T>>> {
        match self.map.remove(&req_id) {
            Some((_, link)) => Some(link),
            None => {
                tracing::warn!(req_id, "request index find_remove missed: no such entry");
                None
            }
        }
    }

    /// Number of entries currently indexed, for diagnostics/tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn add_find_find_remove_round_trip() {
        let index = RequestIndex::new();
        index.add(RequestLink { req_id: 42, payload: "conn-a" });

        let found = index.find(42).unwrap();
        assert_eq!(found.payload, "conn-a");

        let removed = index.find_remove(42).unwrap();
        assert_eq!(removed.payload, "conn-a");
        assert!(index.find(42).is_none());
    }

    #[test]
    fn remove_on_missing_id_does_not_panic() {
        let index: RequestIndex<&str> = RequestIndex::new();
        index.remove(7);
        assert!(index.find_remove(7).is_none());
    }

    #[test]
    fn concurrent_find_remove_even_find_odd() {
        let index = StdArc::new(RequestIndex::new());
        for id in 1..10_000u32 {
            index.add(RequestLink { req_id: id, payload: id });
        }

        let removed_count = StdArc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for worker in 0..4 {
            let index = index.clone();
            let removed_count = removed_count.clone();
            handles.push(thread::spawn(move || {
                for id in (1..10_000u32).filter(|id| id % 4 == worker) {
                    if id % 2 == 0 {
                        if index.find_remove(id).is_some() {
                            removed_count.fetch_add(1, Ordering::Relaxed);
                        }
                    } else {
                        assert!(index.find(id).is_some());
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(removed_count.load(Ordering::Relaxed), 4_999);
        for id in (1..10_000u32).filter(|id| id % 2 == 1) {
            assert!(index.find(id).is_some());
        }
    }
}
