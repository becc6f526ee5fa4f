//! Batch boundaries, lane orchestration, and commit.
//!
//! The [`BatchCoordinator`] owns the lane tasks. For every batch it:
//!
//! 1. Opens a fresh [`StateCache`] and hands each lane its shard.
//! 2. Pulls events from the source until the batch is full, the batch
//!    window elapses, or the stream ends, routing each event to the lane
//!    chosen by the [`Partitioner`].
//! 3. Seals every lane and collects the shards back.
//! 4. Commits the combined action set together with the position of the
//!    last event, retrying on store failure.
//! 5. Releases the lanes into the next batch.
//!
//! Any lane failure abandons the batch without a single store write, and
//! the run stops. A commit that keeps failing halts intake with
//! [`BatchError::CommitExhausted`].

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::cache::StateCache;
use crate::config::ProjectionConfig;
use crate::error::{BatchError, ConfigError, ProjectionError};
use crate::partition::{LaneId, Partitioner};
use crate::retry::with_retry;
use crate::source::EventSource;
use crate::stats::ReplayStats;
use crate::store::AccountStore;
use crate::worker::{LaneCommand, LaneHandle, LaneOutcome, ProjectionWorker, WorkerState};

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Sequence number of the batch within this run.
    pub sequence: u64,
    /// Events applied in the batch.
    pub events: u64,
    /// Position committed with the batch, if anything was committed.
    pub position: Option<u64>,
    /// Flush actions committed.
    pub puts: usize,
    /// Delete actions committed.
    pub deletes: usize,
    /// Create-then-cancel pairs that never reached the store.
    pub elided: u64,
    /// Commit attempts, including the successful one.
    pub commit_attempts: u32,
    /// Whether the source reported the end of the stream.
    pub end_of_stream: bool,
}

/// Outcome of a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Committed batches.
    pub batches: u64,
    /// Events applied across all committed batches.
    pub events: u64,
    /// Position committed before the run started.
    pub resumed_from: Option<u64>,
    /// Last committed position after the run.
    pub last_position: Option<u64>,
}

/// Drives lanes through batches and commits them.
#[derive(Debug)]
pub struct BatchCoordinator<S> {
    config: ProjectionConfig,
    partitioner: Partitioner,
    store: Arc<S>,
    stats: Arc<ReplayStats>,
    lanes: Vec<LaneHandle>,
    sequence: u64,
}

struct SealedLane {
    outcome: LaneOutcome,
    release: oneshot::Sender<()>,
}

impl<S: AccountStore> BatchCoordinator<S> {
    /// Validate `config` and spawn one worker task per lane.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: ProjectionConfig,
        store: Arc<S>,
        stats: Arc<ReplayStats>,
    ) -> Result<Self, ConfigError> {
        let partitioner = config.validate()?;
        let lanes = (0..partitioner.lane_count())
            .map(|lane| {
                ProjectionWorker::new(
                    LaneId(lane),
                    Arc::clone(&store),
                    Arc::clone(&stats),
                    config.mode,
                    config.retry_policy(),
                )
                .spawn(config.lane_queue_capacity)
            })
            .collect();

        info!(
            projection = %config.projection_name,
            lanes = partitioner.lane_count(),
            batch_size = config.batch_size,
            batch_window_ms = config.batch_window_ms,
            commit_retries = config.commit_retries,
            mode = ?config.mode,
            "Batch coordinator started"
        );

        Ok(Self {
            config,
            partitioner,
            store,
            stats,
            lanes,
            sequence: 0,
        })
    }

    /// The lane partitioner in use.
    pub const fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// Shared replay counters.
    pub fn stats(&self) -> Arc<ReplayStats> {
        Arc::clone(&self.stats)
    }

    /// Current state of every lane worker, in lane order.
    pub fn lane_states(&self) -> Vec<(LaneId, WorkerState)> {
        self.lanes
            .iter()
            .map(|handle| (handle.lane, handle.state.get()))
            .collect()
    }

    /// Resume after the last committed position and process batches until
    /// the source ends.
    ///
    /// # Errors
    ///
    /// Stops at the first failed batch. Everything committed before it
    /// stays committed.
    pub async fn run<E: EventSource>(&mut self, source: &mut E) -> Result<RunSummary, BatchError> {
        let resumed_from = self.committed_position().await?;
        let start = resumed_from.map_or(0, |position| position.saturating_add(1));
        source.seek(start).await?;

        info!(
            projection = %self.config.projection_name,
            resumed_from = ?resumed_from,
            start,
            "Replay starting"
        );

        let mut summary = RunSummary {
            batches: 0,
            events: 0,
            resumed_from,
            last_position: resumed_from,
        };
        loop {
            let report = self.run_batch(source).await?;
            if let Some(position) = report.position {
                summary.batches = summary.batches.saturating_add(1);
                summary.events = summary.events.saturating_add(report.events);
                summary.last_position = Some(position);
            }
            if report.end_of_stream {
                break;
            }
        }

        info!(
            projection = %self.config.projection_name,
            batches = summary.batches,
            events = summary.events,
            last_position = ?summary.last_position,
            "Replay finished"
        );
        Ok(summary)
    }

    /// Read the committed position of this projection, with retries.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Store`] once every attempt has failed.
    pub async fn committed_position(&self) -> Result<Option<u64>, BatchError> {
        let store = &self.store;
        let stats = &self.stats;
        let projection = self.config.projection_name.as_str();
        let (position, _attempts) = with_retry(
            self.config.retry_policy(),
            "load_position",
            || stats.record_retry(),
            || store.load_position(projection),
        )
        .await
        .map_err(|exhausted| BatchError::Store(exhausted.error))?;
        Ok(position)
    }

    /// Run exactly one batch against `source`.
    ///
    /// A batch that receives no events commits nothing and does not
    /// consume a sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Projection`] if any lane rejected an event,
    /// [`BatchError::Source`] if the source failed, and
    /// [`BatchError::CommitExhausted`] if the commit failed on every
    /// attempt. In all cases nothing of the batch is committed.
    pub async fn run_batch<E: EventSource>(
        &mut self,
        source: &mut E,
    ) -> Result<BatchReport, BatchError> {
        let sequence = self.sequence.saturating_add(1);
        let cache = StateCache::open(self.partitioner.lane_count());
        for (handle, shard) in self.lanes.iter().zip(cache.into_shards()) {
            send(handle, LaneCommand::Open(shard)).await?;
        }

        let deadline = Instant::now()
            .checked_add(self.config.batch_window())
            .unwrap_or_else(Instant::now);
        let mut dispatched: usize = 0;
        let mut last_position = None;
        let mut end_of_stream = false;

        while dispatched < self.config.batch_size {
            let next = match timeout_at(deadline, source.next_event()).await {
                Ok(next) => next,
                Err(_elapsed) => break,
            };
            match next {
                Ok(Some(envelope)) => {
                    let lane = self.partitioner.lane_for_event(&envelope.event);
                    last_position = Some(envelope.position);
                    let handle = self
                        .lanes
                        .get(lane.index())
                        .ok_or(BatchError::LaneUnavailable { lane })?;
                    send(handle, LaneCommand::Apply(envelope)).await?;
                    dispatched = dispatched.saturating_add(1);
                }
                Ok(None) => {
                    end_of_stream = true;
                    break;
                }
                Err(source_error) => {
                    error!(batch = sequence, error = %source_error, "Event source failed, abandoning batch");
                    self.seal().await?;
                    return Err(source_error.into());
                }
            }
        }

        let sealed = self.seal().await?;
        let mut shards = Vec::with_capacity(sealed.len());
        let mut releases = Vec::with_capacity(sealed.len());
        let mut failure: Option<ProjectionError> = None;
        let mut events: u64 = 0;
        for lane in sealed {
            events = events.saturating_add(lane.outcome.applied);
            if let Err(error) = lane.outcome.result {
                failure = failure.or(Some(error));
            }
            shards.push(lane.outcome.shard);
            releases.push(lane.release);
        }

        if let Some(source) = failure {
            error!(batch = sequence, error = %source, "Batch abandoned, nothing committed");
            return Err(BatchError::Projection {
                batch: sequence,
                source,
            });
        }

        let Some(position) = last_position else {
            debug!(end_of_stream, "Empty batch, nothing to commit");
            return Ok(BatchReport {
                sequence: self.sequence,
                events: 0,
                position: None,
                puts: 0,
                deletes: 0,
                elided: 0,
                commit_attempts: 0,
                end_of_stream,
            });
        };

        if events != dispatched as u64 {
            warn!(
                batch = sequence,
                events,
                dispatched,
                "Lanes applied a different number of events than dispatched"
            );
        }
        let cache = StateCache::from_shards(shards);
        let elided = cache.elided();
        let batch = cache.into_commit_batch(&self.config.projection_name, sequence, position);
        let (puts, deletes) = (batch.puts(), batch.deletes());

        let store = &self.store;
        let stats = &self.stats;
        let commit_attempts = match with_retry(
            self.config.retry_policy(),
            "commit",
            || stats.record_retry(),
            || store.commit(&batch),
        )
        .await
        {
            Ok(((), attempts)) => attempts,
            Err(exhausted) => {
                error!(
                    batch = sequence,
                    attempts = exhausted.attempts,
                    error = %exhausted.error,
                    "Commit failed on every attempt, halting intake"
                );
                return Err(BatchError::CommitExhausted {
                    batch: sequence,
                    attempts: exhausted.attempts,
                    source: exhausted.error,
                });
            }
        };

        for release in releases {
            if release.send(()).is_err() {
                warn!(batch = sequence, "Lane stopped before commit release");
            }
        }

        self.sequence = sequence;
        self.stats.record_applied(events);
        self.stats.record_commit(puts as u64, deletes as u64);
        self.stats.record_elided(elided);

        debug!(
            batch = sequence,
            events,
            puts,
            deletes,
            elided,
            position,
            attempts = commit_attempts,
            "Batch committed"
        );

        Ok(BatchReport {
            sequence,
            events,
            position: Some(position),
            puts,
            deletes,
            elided,
            commit_attempts,
            end_of_stream,
        })
    }

    /// Seal every lane and wait for all shards to come back.
    async fn seal(&self) -> Result<Vec<SealedLane>, BatchError> {
        let mut pending = Vec::with_capacity(self.lanes.len());
        for handle in &self.lanes {
            let (reply, outcome) = oneshot::channel();
            let (release, committed) = oneshot::channel();
            send(handle, LaneCommand::Seal { reply, committed }).await?;
            pending.push((handle.lane, outcome, release));
        }

        let (waits, releases): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .map(|(lane, outcome, release)| {
                (async move { outcome.await.map_err(|_closed| lane) }, release)
            })
            .unzip();

        join_all(waits)
            .await
            .into_iter()
            .zip(releases)
            .map(|(outcome, release)| {
                outcome
                    .map(|outcome| SealedLane { outcome, release })
                    .map_err(|lane| BatchError::LaneUnavailable { lane })
            })
            .collect()
    }

    /// Stop every lane task and wait for them to exit.
    pub async fn shutdown(self) {
        let tasks: Vec<_> = self
            .lanes
            .into_iter()
            .map(|handle| {
                drop(handle.commands);
                (handle.lane, handle.task)
            })
            .collect();
        for (lane, task) in tasks {
            if let Err(join_error) = task.await {
                warn!(lane = %lane, error = %join_error, "Lane task ended abnormally");
            }
        }
        debug!("Batch coordinator stopped");
    }
}

async fn send(handle: &LaneHandle, command: LaneCommand) -> Result<(), BatchError> {
    handle
        .commands
        .send(command)
        .await
        .map_err(|_closed| BatchError::LaneUnavailable { lane: handle.lane })
}
