//! Per-lane event application.
//!
//! A [`ProjectionWorker`] applies the events of one lane to that lane's
//! [`LaneShard`]. Within a batch it never writes to the store; the only
//! store traffic it causes is a point read when it needs the committed
//! state of an account that is not staged yet, and one read per surviving
//! `Created` when the batch is sealed.
//!
//! In [`ProjectionMode::WriteThrough`] the shard stays empty and every event
//! goes straight to the store as a read followed by a put, or as a delete.
//!
//! Each worker runs as its own task, driven by a bounded command queue:
//!
//! ```text
//!          Open(shard)            Seal
//!   Idle ------------> Applying -------> AwaitingCommit
//!    ^                                        |
//!    +------------ committed / abandoned -----+
//! ```
//!
//! After sealing, the worker hands its shard back and does not touch the
//! next batch until the coordinator reports the commit outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use replay_types::{AccountEvent, AccountId, AccountSummary, EventEnvelope, MoneyError, round_money};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::LaneShard;
use crate::config::ProjectionMode;
use crate::error::ProjectionError;
use crate::partition::LaneId;
use crate::retry::{RetryPolicy, with_retry};
use crate::stats::ReplayStats;
use crate::store::AccountStore;

/// Lifecycle state of a lane worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No batch is open.
    Idle,
    /// A batch is open and events are being applied.
    Applying,
    /// The shard was handed back; waiting for the commit outcome.
    AwaitingCommit,
}

impl WorkerState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Applying => 1,
            Self::AwaitingCommit => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Applying,
            2 => Self::AwaitingCommit,
            _ => Self::Idle,
        }
    }
}

/// Shared, lock-free view of a worker's state.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Credit,
    Debit,
}

impl Direction {
    fn apply(self, summary: &mut AccountSummary, amount: Decimal) -> Result<(), MoneyError> {
        match self {
            Self::Credit => summary.credit(amount),
            Self::Debit => summary.debit(amount),
        }
    }
}

/// Applies the events of one lane to its shard.
#[derive(Debug)]
pub struct ProjectionWorker<S> {
    lane: LaneId,
    store: Arc<S>,
    stats: Arc<ReplayStats>,
    mode: ProjectionMode,
    retry: RetryPolicy,
    state: StateCell,
}

impl<S: AccountStore> ProjectionWorker<S> {
    /// Create an idle worker for `lane`.
    pub fn new(
        lane: LaneId,
        store: Arc<S>,
        stats: Arc<ReplayStats>,
        mode: ProjectionMode,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lane,
            store,
            stats,
            mode,
            retry,
            state: StateCell::default(),
        }
    }

    /// The lane this worker owns.
    pub const fn lane(&self) -> LaneId {
        self.lane
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Apply one event to `shard`, or to the store in write-through mode.
    ///
    /// Consistency violations are returned, never skipped; the caller must
    /// abandon the batch.
    pub async fn apply(
        &self,
        shard: &mut LaneShard,
        envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError> {
        let position = envelope.position;
        trace!(lane = %self.lane, position, kind = %envelope.event.kind(), "Applying event");
        if self.mode == ProjectionMode::WriteThrough {
            return self.write_through(envelope).await;
        }
        match envelope.event {
            AccountEvent::Created { account_id } => self.create(shard, account_id, position),
            AccountEvent::Credited { account_id, amount } => {
                self.mutate(shard, account_id, amount, position, Direction::Credit)
                    .await
            }
            AccountEvent::Debited { account_id, amount } => {
                self.mutate(shard, account_id, amount, position, Direction::Debit)
                    .await
            }
            AccountEvent::Cancelled { account_id } => {
                shard.cancel(account_id);
                Ok(())
            }
        }
    }

    /// Check every create staged in `shard` against the store.
    ///
    /// Runs once per batch, before the shard is handed back. Reports the
    /// earliest `Created` whose account already has a committed copy.
    ///
    /// # Errors
    ///
    /// [`ProjectionError::DuplicateEntity`] for a stored duplicate, or
    /// [`ProjectionError::StoreRead`] if the check itself failed.
    pub async fn verify_creates(&self, shard: &LaneShard) -> Result<(), ProjectionError> {
        for (account_id, position) in shard.unverified_creates() {
            if self.read(account_id).await?.is_some() {
                return Err(self.duplicate(account_id, position));
            }
        }
        Ok(())
    }

    fn create(
        &self,
        shard: &mut LaneShard,
        account_id: AccountId,
        position: u64,
    ) -> Result<(), ProjectionError> {
        if shard.is_staged(account_id) {
            return Err(self.duplicate(account_id, position));
        }
        shard.stage_created(account_id, position);
        Ok(())
    }

    async fn mutate(
        &self,
        shard: &mut LaneShard,
        account_id: AccountId,
        amount: Decimal,
        position: u64,
        direction: Direction,
    ) -> Result<(), ProjectionError> {
        let amount = positive_amount(account_id, amount, position)?;

        if !shard.is_staged(account_id) {
            if shard.is_pending_delete(account_id) {
                return Err(self.unknown(account_id, position));
            }
            let stored = self
                .read(account_id)
                .await?
                .ok_or_else(|| self.unknown(account_id, position))?;
            shard.stage_loaded(stored);
        }

        let summary = shard
            .staged_mut(account_id)
            .ok_or_else(|| self.unknown(account_id, position))?;
        direction
            .apply(summary, amount)
            .map_err(|source| ProjectionError::Balance { account_id, source })
    }

    async fn write_through(&self, envelope: &EventEnvelope) -> Result<(), ProjectionError> {
        let position = envelope.position;
        let (account_id, amount, direction) = match envelope.event {
            AccountEvent::Created { account_id } => {
                if self.read(account_id).await?.is_some() {
                    return Err(self.duplicate(account_id, position));
                }
                return self.put(&AccountSummary::open(account_id)).await;
            }
            AccountEvent::Cancelled { account_id } => return self.delete(account_id).await,
            AccountEvent::Credited { account_id, amount } => (account_id, amount, Direction::Credit),
            AccountEvent::Debited { account_id, amount } => (account_id, amount, Direction::Debit),
        };

        let amount = positive_amount(account_id, amount, position)?;
        let mut summary = self
            .read(account_id)
            .await?
            .ok_or_else(|| self.unknown(account_id, position))?;
        direction
            .apply(&mut summary, amount)
            .map_err(|source| ProjectionError::Balance { account_id, source })?;
        self.put(&summary).await
    }

    async fn read(
        &self,
        account_id: AccountId,
    ) -> Result<Option<AccountSummary>, ProjectionError> {
        let store = &self.store;
        let stats = &self.stats;
        with_retry(
            self.retry,
            "get",
            || stats.record_retry(),
            || {
                stats.record_store_read();
                store.get(account_id)
            },
        )
        .await
        .map(|(summary, _attempts)| summary)
        .map_err(|exhausted| ProjectionError::StoreRead {
            account_id,
            source: exhausted.error,
        })
    }

    async fn put(&self, summary: &AccountSummary) -> Result<(), ProjectionError> {
        let stats = &self.stats;
        with_retry(
            self.retry,
            "put",
            || stats.record_retry(),
            || self.store.put(summary),
        )
        .await
        .map_err(|exhausted| ProjectionError::StoreWrite {
            account_id: summary.account_id,
            source: exhausted.error,
        })?;
        stats.record_writes(1, 0);
        Ok(())
    }

    async fn delete(&self, account_id: AccountId) -> Result<(), ProjectionError> {
        let stats = &self.stats;
        with_retry(
            self.retry,
            "delete",
            || stats.record_retry(),
            || self.store.delete(account_id),
        )
        .await
        .map_err(|exhausted| ProjectionError::StoreWrite {
            account_id,
            source: exhausted.error,
        })?;
        stats.record_writes(0, 1);
        Ok(())
    }

    const fn duplicate(&self, account_id: AccountId, position: u64) -> ProjectionError {
        ProjectionError::DuplicateEntity {
            account_id,
            lane: self.lane,
            position,
        }
    }

    const fn unknown(&self, account_id: AccountId, position: u64) -> ProjectionError {
        ProjectionError::UnknownEntity {
            account_id,
            lane: self.lane,
            position,
        }
    }
}

/// Round `amount` to cents and require the result to be positive.
fn positive_amount(
    account_id: AccountId,
    amount: Decimal,
    position: u64,
) -> Result<Decimal, ProjectionError> {
    let rounded = round_money(amount);
    if rounded <= Decimal::ZERO {
        return Err(ProjectionError::InvalidAmount {
            account_id,
            amount,
            position,
        });
    }
    Ok(rounded)
}

/// Commands a lane task accepts from the coordinator.
#[derive(Debug)]
pub(crate) enum LaneCommand {
    /// Start a batch with this shard.
    Open(LaneShard),
    /// Apply one event of the open batch.
    Apply(EventEnvelope),
    /// Close the batch, hand the shard back, then wait for the commit
    /// outcome. A dropped `committed` sender means the batch was abandoned.
    Seal {
        reply: oneshot::Sender<LaneOutcome>,
        committed: oneshot::Receiver<()>,
    },
}

/// What a lane hands back when its batch is sealed.
#[derive(Debug)]
pub(crate) struct LaneOutcome {
    pub(crate) shard: LaneShard,
    pub(crate) applied: u64,
    pub(crate) result: Result<(), ProjectionError>,
}

/// Coordinator-side handle of a running lane task.
#[derive(Debug)]
pub(crate) struct LaneHandle {
    pub(crate) lane: LaneId,
    pub(crate) commands: mpsc::Sender<LaneCommand>,
    pub(crate) state: StateCell,
    pub(crate) task: JoinHandle<()>,
}

struct OpenBatch {
    shard: LaneShard,
    applied: u64,
    failure: Option<ProjectionError>,
}

impl<S: AccountStore> ProjectionWorker<S> {
    /// Move the worker onto its own task behind a queue of `capacity`.
    pub(crate) fn spawn(self, capacity: usize) -> LaneHandle {
        let (commands, receiver) = mpsc::channel(capacity);
        let lane = self.lane;
        let state = self.state.clone();
        let task = tokio::spawn(self.run(receiver));
        LaneHandle {
            lane,
            commands,
            state,
            task,
        }
    }

    async fn run(self, mut commands: mpsc::Receiver<LaneCommand>) {
        let mut open: Option<OpenBatch> = None;
        while let Some(command) = commands.recv().await {
            match command {
                LaneCommand::Open(shard) => {
                    open = Some(OpenBatch {
                        shard,
                        applied: 0,
                        failure: None,
                    });
                    self.state.set(WorkerState::Applying);
                }
                LaneCommand::Apply(envelope) => match open.as_mut() {
                    Some(batch) if batch.failure.is_none() => {
                        match self.apply(&mut batch.shard, &envelope).await {
                            Ok(()) => batch.applied = batch.applied.saturating_add(1),
                            Err(error) => {
                                warn!(lane = %self.lane, position = envelope.position, error = %error, "Event rejected, lane halted for this batch");
                                batch.failure = Some(error);
                            }
                        }
                    }
                    // Everything after the first failure is discarded with the batch.
                    Some(_) => {}
                    None => {
                        warn!(lane = %self.lane, position = envelope.position, "Event received with no open batch");
                        open = Some(OpenBatch {
                            shard: LaneShard::new(self.lane),
                            applied: 0,
                            failure: Some(ProjectionError::NoOpenBatch { lane: self.lane }),
                        });
                    }
                },
                LaneCommand::Seal { reply, committed } => {
                    let outcome = match open.take() {
                        Some(mut batch) => {
                            if batch.failure.is_none() {
                                batch.failure = self.verify_creates(&batch.shard).await.err();
                                if let Some(error) = &batch.failure {
                                    warn!(lane = %self.lane, error = %error, "Create check failed, lane halted for this batch");
                                }
                            }
                            LaneOutcome {
                                shard: batch.shard,
                                applied: batch.applied,
                                result: batch.failure.map_or(Ok(()), Err),
                            }
                        }
                        None => LaneOutcome {
                            shard: LaneShard::new(self.lane),
                            applied: 0,
                            result: Ok(()),
                        },
                    };
                    self.state.set(WorkerState::AwaitingCommit);
                    if reply.send(outcome).is_err() {
                        debug!(lane = %self.lane, "Coordinator gone, lane stopping");
                        break;
                    }
                    match committed.await {
                        Ok(()) => trace!(lane = %self.lane, "Batch committed"),
                        Err(_abandoned) => debug!(lane = %self.lane, "Batch abandoned"),
                    }
                    self.state.set(WorkerState::Idle);
                }
            }
        }
        self.state.set(WorkerState::Idle);
        debug!(lane = %self.lane, "Lane stopped");
    }
}
