//! Per-handle statistics counters.
//!
//! Counters are cumulative since handle creation and recorded with relaxed
//! atomics: cheap on the hot path, best-effort under races. Snapshots are
//! point-in-time copies; `items` is the handle's entry count at snapshot time.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters owned by a handle.
///
/// Handles increment these inside their own operations, which keeps the
/// accounting aligned with what each layer actually executed: the bottom
/// handle counts the `add` of a bottom-write, every handle counts a fan-out
/// `put`, and region clears count separately from full clears.
#[derive(Debug, Default)]
pub struct HandleStats {
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    adds: AtomicU64,
    puts: AtomicU64,
    removes: AtomicU64,
    updates: AtomicU64,
    clears: AtomicU64,
    clear_regions: AtomicU64,
}

impl HandleStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot current counters, recording `items` as the entry count.
    pub fn snapshot(&self, items: u64) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            adds: self.adds.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            clear_regions: self.clear_regions.load(Ordering::Relaxed),
            items,
        }
    }

    pub(crate) fn inc_gets(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_misses(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_adds(&self) {
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_puts(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_removes(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_clears(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_clear_regions(&self) {
        self.clear_regions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a handle's counters.
///
/// # Example
///
/// ```
/// use tierkit::stats::StatsSnapshot;
///
/// let snapshot = StatsSnapshot {
///     gets: 200,
///     hits: 150,
///     misses: 50,
///     ..Default::default()
/// };
/// let hit_rate = snapshot.hits as f64 / snapshot.gets as f64;
/// assert!((hit_rate - 0.75).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lookup calls.
    pub gets: u64,
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry).
    pub misses: u64,
    /// Create-if-absent calls.
    pub adds: u64,
    /// Upsert calls.
    pub puts: u64,
    /// Removal calls that found an entry.
    pub removes: u64,
    /// Atomic update calls.
    pub updates: u64,
    /// Full clears.
    pub clears: u64,
    /// Region clears (counted separately from full clears).
    pub clear_regions: u64,
    /// Entry count at snapshot time.
    pub items: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = HandleStats::new();
        stats.inc_gets();
        stats.inc_gets();
        stats.inc_hits();
        stats.inc_misses();
        stats.inc_adds();
        stats.inc_puts();
        stats.inc_removes();
        stats.inc_updates();
        stats.inc_clears();
        stats.inc_clear_regions();

        let snapshot = stats.snapshot(7);
        assert_eq!(snapshot.gets, 2);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.adds, 1);
        assert_eq!(snapshot.puts, 1);
        assert_eq!(snapshot.removes, 1);
        assert_eq!(snapshot.updates, 1);
        assert_eq!(snapshot.clears, 1);
        assert_eq!(snapshot.clear_regions, 1);
        assert_eq!(snapshot.items, 7);
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let stats = HandleStats::new();
        stats.inc_hits();
        let before = stats.snapshot(0);
        stats.inc_hits();
        let after = stats.snapshot(0);
        assert_eq!(before.hits, 1);
        assert_eq!(after.hits, 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(HandleStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.inc_gets();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot(0).gets, 8000);
    }
}
