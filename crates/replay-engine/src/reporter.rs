//! Periodic replay progress logging.

use std::sync::Arc;
use std::time::Duration;

use replay_projection::ReplayStats;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

/// Spawn a task that logs counter deltas every `interval`.
///
/// The task runs until aborted.
pub fn spawn(stats: Arc<ReplayStats>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut previous = stats.snapshot();
        let mut since = Instant::now();
        loop {
            ticker.tick().await;
            let current = stats.snapshot();
            let delta = current.since(&previous);
            info!(
                events = delta.events_applied,
                events_per_sec = per_second(delta.events_applied, since.elapsed()),
                total_events = current.events_applied,
                batches = delta.batches_committed,
                puts = delta.puts,
                deletes = delta.deletes,
                elided_cancels = delta.elided_cancels,
                store_reads = delta.store_reads,
                retries = delta.retries,
                "Replay progress"
            );
            previous = current;
            since = Instant::now();
        }
    })
}

/// Throughput of `count` items over `elapsed`, rounded down.
///
/// Returns 0 for intervals shorter than a millisecond.
pub fn per_second(count: u64, elapsed: Duration) -> u64 {
    u128::from(count)
        .saturating_mul(1000)
        .checked_div(elapsed.as_millis())
        .map_or(0, |rate| u64::try_from(rate).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_second_scales_by_elapsed() {
        assert_eq!(per_second(5000, Duration::from_secs(2)), 2500);
        assert_eq!(per_second(3, Duration::from_millis(1500)), 2);
        assert_eq!(per_second(10, Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn reporter_runs_until_aborted() {
        let stats = Arc::new(ReplayStats::new());
        let handle = spawn(Arc::clone(&stats), Duration::from_millis(10));
        stats.record_applied(10);
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(!handle.is_finished());
        handle.abort();
        let joined = handle.await;
        assert!(joined.is_err_and(|e| e.is_cancelled()));
    }
}
