//! Process-wide outcome counters
//!
//! Created once at startup and shared as `Arc<StatsTracker>`. Each counter
//! is an independent atomic; a snapshot is not a consistent cut across both.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counts of completed and failed transactions
#[derive(Debug, Default)]
pub struct StatsTracker {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub completed: u64,
    pub failed: u64,
}

impl Stats {
    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> Stats {
        Stats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    ///
    /// Administrative action only; nothing in the processing path calls it.
    pub fn reset(&self) {
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_tracker_is_zero() {
        let stats = StatsTracker::new();

        assert_eq!(stats.snapshot(), Stats::default());
    }

    #[rstest]
    #[case::only_completed(25, 0)]
    #[case::only_failed(0, 13)]
    #[case::mixed(400, 250)]
    fn test_concurrent_increments_are_exact(#[case] completed: u64, #[case] failed: u64) {
        let stats = Arc::new(StatsTracker::new());

        let mut handles = Vec::new();
        for _ in 0..completed {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || stats.record_completed()));
        }
        for _ in 0..failed {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || stats.record_failed()));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot, Stats { completed, failed });
        assert_eq!(snapshot.total(), completed + failed);
    }

    #[test]
    fn test_reset_clears_counters() {
        let stats = StatsTracker::new();
        stats.record_completed();
        stats.record_failed();
        stats.record_failed();

        stats.reset();

        assert_eq!(stats.snapshot(), Stats::default());
    }
}
