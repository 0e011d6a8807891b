//! Instruction-level measurements.
//!
//! Each `m_counter` instruction is bound at link time to a [`Counter`] in
//! a process-wide registry keyed by method and instruction offset.
//! Linked programs own their counters; the registry only holds weak
//! references, so a counter lives as long as some program uses it.
//! Relinking a method while its old program is alive rebinds to the same
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;

use crate::value::MethodId;

#[derive(Debug)]
pub struct Counter {
    method: MethodId,
    ip: usize,
    count: AtomicU64,
}

impl Counter {
    fn new(method: MethodId, ip: usize) -> Self {
        Self {
            method,
            ip,
            count: AtomicU64::new(0),
        }
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

lazy_static! {
    static ref MEASUREMENTS: Mutex<FxHashMap<(MethodId, usize), Weak<Counter>>> =
        Mutex::new(FxHashMap::default());
}

/// The counter for `(method, ip)`, registering it on first use.
pub fn counter(method: MethodId, ip: usize) -> Arc<Counter> {
    #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
    let mut measurements = MEASUREMENTS.lock().unwrap();
    if let Some(live) = measurements.get(&(method, ip)).and_then(Weak::upgrade) {
        return live;
    }
    measurements.retain(|_, counter| counter.strong_count() > 0);
    let counter = Arc::new(Counter::new(method, ip));
    measurements.insert((method, ip), Arc::downgrade(&counter));
    counter
}

pub fn lookup(method: MethodId, ip: usize) -> Option<Arc<Counter>> {
    #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
    let measurements = MEASUREMENTS.lock().unwrap();
    measurements.get(&(method, ip)).and_then(Weak::upgrade)
}

/// All live counters with their counts, ordered by method and ip.
pub fn snapshot() -> Vec<(MethodId, usize, u64)> {
    #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
    let measurements = MEASUREMENTS.lock().unwrap();
    let mut counts: Vec<_> = measurements
        .values()
        .filter_map(Weak::upgrade)
        .map(|counter| (counter.method, counter.ip, counter.count()))
        .collect();
    counts.sort_unstable();
    counts
}

/// Drop every registered counter.
#[cfg(any(test, feature = "test-utils"))]
pub fn reset_for_testing() {
    #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
    let mut measurements = MEASUREMENTS.lock().unwrap();
    measurements.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_counter_is_shared_per_site() {
        reset_for_testing();
        let method = MethodId::next();
        let a = counter(method, 3);
        let b = counter(method, 3);
        a.increment();
        b.increment();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(lookup(method, 3).unwrap().count(), 2);
        assert!(lookup(method, 4).is_none());
    }

    #[test]
    #[serial]
    fn test_snapshot_lists_registered_counters() {
        reset_for_testing();
        let method = MethodId::next();
        let first = counter(method, 0);
        let _second = counter(method, 5);
        first.increment();
        let ours: Vec<_> = snapshot()
            .into_iter()
            .filter(|(m, _, _)| *m == method)
            .collect();
        assert_eq!(ours, vec![(method, 0, 1), (method, 5, 0)]);
    }

    #[test]
    #[serial]
    fn test_counters_are_released_with_their_programs() {
        reset_for_testing();
        let method = MethodId::next();
        let held = counter(method, 2);
        held.increment();
        drop(held);
        assert!(lookup(method, 2).is_none());

        // A fresh binding starts from zero and replaces the dead entry.
        let fresh = counter(method, 2);
        assert_eq!(fresh.count(), 0);
        assert_eq!(lookup(method, 2).map(|c| c.count()), Some(0));
        assert!(snapshot().iter().all(|(m, ip, _)| *m != method || *ip == 2));
    }
}
