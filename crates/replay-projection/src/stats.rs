//! Replay counters.
//!
//! [`ReplayStats`] is shared by the coordinator and every lane worker. All
//! counters are monotonic and updated with relaxed atomics; a
//! [`StatsSnapshot`] is a point-in-time copy for logging and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters of a replay run.
#[derive(Debug, Default)]
pub struct ReplayStats {
    events_applied: AtomicU64,
    batches_committed: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    elided_cancels: AtomicU64,
    store_reads: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`ReplayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Events applied to staged state.
    pub events_applied: u64,
    /// Batches committed to the store.
    pub batches_committed: u64,
    /// Puts that reached the store, at commit or written through.
    pub puts: u64,
    /// Deletes that reached the store, at commit or written through.
    pub deletes: u64,
    /// Create-then-cancel pairs that never reached the store.
    pub elided_cancels: u64,
    /// Entity reads issued against the store.
    pub store_reads: u64,
    /// Store operations that were retried.
    pub retries: u64,
}

impl ReplayStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `n` applied events.
    pub fn record_applied(&self, n: u64) {
        self.events_applied.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a committed batch with its action counts.
    pub fn record_commit(&self, puts: u64, deletes: u64) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.puts.fetch_add(puts, Ordering::Relaxed);
        self.deletes.fetch_add(deletes, Ordering::Relaxed);
    }

    /// Record puts and deletes written outside of a batch commit.
    pub fn record_writes(&self, puts: u64, deletes: u64) {
        self.puts.fetch_add(puts, Ordering::Relaxed);
        self.deletes.fetch_add(deletes, Ordering::Relaxed);
    }

    /// Record `n` elided create-then-cancel pairs.
    pub fn record_elided(&self, n: u64) {
        self.elided_cancels.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one entity read against the store.
    pub fn record_store_read(&self) {
        self.store_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one retried store operation.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            elided_cancels: self.elided_cancels.load(Ordering::Relaxed),
            store_reads: self.store_reads.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Counter deltas between `earlier` and `self`.
    pub const fn since(&self, earlier: &Self) -> Self {
        Self {
            events_applied: self.events_applied.saturating_sub(earlier.events_applied),
            batches_committed: self
                .batches_committed
                .saturating_sub(earlier.batches_committed),
            puts: self.puts.saturating_sub(earlier.puts),
            deletes: self.deletes.saturating_sub(earlier.deletes),
            elided_cancels: self.elided_cancels.saturating_sub(earlier.elided_cancels),
            store_reads: self.store_reads.saturating_sub(earlier.store_reads),
            retries: self.retries.saturating_sub(earlier.retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let stats = ReplayStats::new();
        stats.record_applied(5);
        stats.record_commit(2, 1);
        stats.record_elided(1);
        stats.record_store_read();
        stats.record_retry();
        stats.record_writes(1, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.events_applied, 5);
        assert_eq!(snap.batches_committed, 1);
        assert_eq!(snap.puts, 3);
        assert_eq!(snap.deletes, 2);
        assert_eq!(snap.elided_cancels, 1);
        assert_eq!(snap.store_reads, 1);
        assert_eq!(snap.retries, 1);
    }

    #[test]
    fn since_computes_deltas() {
        let stats = ReplayStats::new();
        stats.record_applied(10);
        let earlier = stats.snapshot();
        stats.record_applied(4);
        stats.record_commit(3, 0);
        let delta = stats.snapshot().since(&earlier);
        assert_eq!(delta.events_applied, 4);
        assert_eq!(delta.batches_committed, 1);
        assert_eq!(delta.puts, 3);
    }
}
