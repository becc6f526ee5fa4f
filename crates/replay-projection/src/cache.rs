//! Batch-scoped, lane-sharded staged state.
//!
//! A [`StateCache`] lives for exactly one batch. It is opened empty by the
//! coordinator, split into one [`LaneShard`] per lane, mutated only by the
//! lane that owns each shard, reassembled at the batch boundary, and drained
//! into a [`CommitBatch`]. Because lanes own disjoint key ranges, no shard
//! is ever touched by two workers.
//!
//! Each shard maps an account to its slot, and the slot doubles as the
//! account's deferred action:
//!
//! | Slot | Deferred action at commit |
//! |------|---------------------------|
//! | `Staged` | flush the final staged value |
//! | `Deleted` | delete from the store |
//! | absent | nothing |
//!
//! Registering an action is therefore idempotent by construction: only the
//! first mutation of an account within a batch creates its slot.
//!
//! A `Created` account is staged without a store read. The shard remembers
//! where it was created so the lane can check the store for a committed copy
//! once, at seal time, and only for creates that still carry a flush.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use replay_types::{AccountId, AccountSummary};

use crate::partition::LaneId;

/// The deferred action registered for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    /// Write the final staged value.
    Flush,
    /// Remove the account from the store.
    Delete,
}

/// A store action produced at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAction {
    /// Overwrite the stored summary with this final value.
    Put(AccountSummary),
    /// Delete the stored summary.
    Delete(AccountId),
}

impl CommitAction {
    /// The account this action targets.
    pub const fn account_id(&self) -> AccountId {
        match self {
            Self::Put(summary) => summary.account_id,
            Self::Delete(account_id) => *account_id,
        }
    }
}

/// Everything a store must persist atomically for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    /// Projection whose read position is advanced.
    pub projection: String,
    /// Sequence number of the batch within this run.
    pub sequence: u64,
    /// Position of the last event applied in the batch.
    pub position: u64,
    /// At most one action per account.
    pub actions: Vec<CommitAction>,
}

impl CommitBatch {
    /// Number of put actions.
    pub fn puts(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, CommitAction::Put(_)))
            .count()
    }

    /// Number of delete actions.
    pub fn deletes(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, CommitAction::Delete(_)))
            .count()
    }
}

/// What a cancel did to the shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The account never left memory; its flush was dropped.
    Elided,
    /// A delete is now scheduled.
    DeleteScheduled,
}

#[derive(Debug, Clone)]
struct StagedAccount {
    summary: AccountSummary,
    /// Whether a committed copy exists in the store.
    stored_copy: bool,
    /// Position of the `Created` event whose absence from the store has not
    /// been confirmed yet.
    unverified_create: Option<u64>,
}

#[derive(Debug, Clone)]
enum Slot {
    Staged(StagedAccount),
    Deleted,
}

/// The staged state owned by one lane for one batch.
#[derive(Debug)]
pub struct LaneShard {
    lane: LaneId,
    slots: HashMap<AccountId, Slot>,
    elided: u64,
}

impl LaneShard {
    /// Create an empty shard for `lane`.
    pub fn new(lane: LaneId) -> Self {
        Self {
            lane,
            slots: HashMap::new(),
            elided: 0,
        }
    }

    /// The lane owning this shard.
    pub const fn lane(&self) -> LaneId {
        self.lane
    }

    /// Whether `account_id` has a staged value in this batch.
    pub fn is_staged(&self, account_id: AccountId) -> bool {
        matches!(self.slots.get(&account_id), Some(Slot::Staged(_)))
    }

    /// Whether `account_id` has a delete pending in this batch.
    pub fn is_pending_delete(&self, account_id: AccountId) -> bool {
        matches!(self.slots.get(&account_id), Some(Slot::Deleted))
    }

    /// The staged value of `account_id`, if any.
    pub fn staged(&self, account_id: AccountId) -> Option<&AccountSummary> {
        match self.slots.get(&account_id) {
            Some(Slot::Staged(staged)) => Some(&staged.summary),
            Some(Slot::Deleted) | None => None,
        }
    }

    /// Mutable access to the staged value of `account_id`, if any.
    pub fn staged_mut(&mut self, account_id: AccountId) -> Option<&mut AccountSummary> {
        match self.slots.get_mut(&account_id) {
            Some(Slot::Staged(staged)) => Some(&mut staged.summary),
            Some(Slot::Deleted) | None => None,
        }
    }

    /// The deferred action currently registered for `account_id`.
    pub fn pending_action(&self, account_id: AccountId) -> Option<DeferredAction> {
        self.slots.get(&account_id).map(|slot| match slot {
            Slot::Staged(_) => DeferredAction::Flush,
            Slot::Deleted => DeferredAction::Delete,
        })
    }

    /// Stage an account created at `position` at `0.00` and register its
    /// flush.
    ///
    /// If a delete was pending for the id, the committed copy is replaced by
    /// the new account: the flush overwrites it. Otherwise the create stays
    /// unverified until [`unverified_creates`](Self::unverified_creates) is
    /// checked against the store.
    pub fn stage_created(&mut self, account_id: AccountId, position: u64) {
        let stored_copy = self.is_pending_delete(account_id);
        self.slots.insert(
            account_id,
            Slot::Staged(StagedAccount {
                summary: AccountSummary::open(account_id),
                stored_copy,
                unverified_create: (!stored_copy).then_some(position),
            }),
        );
    }

    /// Stage an account read from the store and register its flush.
    pub fn stage_loaded(&mut self, summary: AccountSummary) {
        self.slots.insert(
            summary.account_id,
            Slot::Staged(StagedAccount {
                summary,
                stored_copy: true,
                unverified_create: None,
            }),
        );
    }

    /// Cancel `account_id` within this batch.
    ///
    /// An account that exists only in memory is dropped together with its
    /// flush. Anything with a committed copy gets a delete instead; no read
    /// is needed for that.
    pub fn cancel(&mut self, account_id: AccountId) -> CancelOutcome {
        match self.slots.entry(account_id) {
            Entry::Occupied(mut occupied) => {
                let stored_copy = match occupied.get() {
                    Slot::Staged(staged) => staged.stored_copy,
                    Slot::Deleted => true,
                };
                if stored_copy {
                    occupied.insert(Slot::Deleted);
                    CancelOutcome::DeleteScheduled
                } else {
                    occupied.remove();
                    self.elided = self.elided.saturating_add(1);
                    CancelOutcome::Elided
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Deleted);
                CancelOutcome::DeleteScheduled
            }
        }
    }

    /// Creates that would flush over whatever the store holds, with the
    /// position of their `Created` event, in position order.
    ///
    /// A create that was cancelled again in the same batch is not listed: it
    /// never reaches the store.
    pub fn unverified_creates(&self) -> Vec<(AccountId, u64)> {
        let mut creates: Vec<(AccountId, u64)> = self
            .slots
            .iter()
            .filter_map(|(account_id, slot)| match slot {
                Slot::Staged(staged) => staged
                    .unverified_create
                    .map(|position| (*account_id, position)),
                Slot::Deleted => None,
            })
            .collect();
        creates.sort_by_key(|&(_, position)| position);
        creates
    }

    /// Number of accounts with a registered action.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no action is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of create-then-cancel pairs elided in this shard.
    pub const fn elided(&self) -> u64 {
        self.elided
    }

    fn drain_into(self, actions: &mut Vec<CommitAction>) {
        actions.extend(self.slots.into_iter().map(|(account_id, slot)| match slot {
            Slot::Staged(staged) => CommitAction::Put(staged.summary),
            Slot::Deleted => CommitAction::Delete(account_id),
        }));
    }
}

/// The staged state of one batch across all lanes.
#[derive(Debug)]
pub struct StateCache {
    shards: Vec<LaneShard>,
}

impl StateCache {
    /// Open an empty cache with one shard per lane.
    pub fn open(lanes: u32) -> Self {
        Self {
            shards: (0..lanes).map(|lane| LaneShard::new(LaneId(lane))).collect(),
        }
    }

    /// Reassemble a cache from shards returned by the lanes.
    pub fn from_shards(mut shards: Vec<LaneShard>) -> Self {
        shards.sort_by_key(LaneShard::lane);
        Self { shards }
    }

    /// Hand each lane its shard.
    pub fn into_shards(self) -> Vec<LaneShard> {
        self.shards
    }

    /// The shard of `lane`.
    pub fn shard(&self, lane: LaneId) -> Option<&LaneShard> {
        self.shards.iter().find(|shard| shard.lane == lane)
    }

    /// Total number of accounts with a registered action.
    pub fn len(&self) -> usize {
        self.shards.iter().map(LaneShard::len).sum()
    }

    /// Whether no lane registered any action.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(LaneShard::is_empty)
    }

    /// Total elided create-then-cancel pairs.
    pub fn elided(&self) -> u64 {
        self.shards
            .iter()
            .fold(0u64, |acc, shard| acc.saturating_add(shard.elided))
    }

    /// Drain every shard into the batch's commit set, consuming the cache.
    pub fn into_commit_batch(self, projection: &str, sequence: u64, position: u64) -> CommitBatch {
        let mut actions = Vec::with_capacity(self.len());
        for shard in self.shards {
            shard.drain_into(&mut actions);
        }
        CommitBatch {
            projection: projection.to_owned(),
            sequence,
            position,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn shard() -> LaneShard {
        LaneShard::new(LaneId(0))
    }

    #[test]
    fn created_then_cancelled_is_elided() {
        let mut shard = shard();
        let id = AccountId::new();
        shard.stage_created(id, 0);
        assert_eq!(shard.pending_action(id), Some(DeferredAction::Flush));

        assert_eq!(shard.cancel(id), CancelOutcome::Elided);
        assert_eq!(shard.pending_action(id), None);
        assert!(shard.is_empty());
        assert_eq!(shard.elided(), 1);
        assert!(shard.unverified_creates().is_empty());
    }

    #[test]
    fn cancel_of_unstaged_account_schedules_delete() {
        let mut shard = shard();
        let id = AccountId::new();
        assert_eq!(shard.cancel(id), CancelOutcome::DeleteScheduled);
        assert_eq!(shard.pending_action(id), Some(DeferredAction::Delete));
    }

    #[test]
    fn cancel_of_loaded_account_replaces_flush_with_delete() {
        let mut shard = shard();
        let id = AccountId::new();
        shard.stage_loaded(AccountSummary {
            account_id: id,
            balance: dec!(5.00),
        });
        assert_eq!(shard.cancel(id), CancelOutcome::DeleteScheduled);
        assert_eq!(shard.pending_action(id), Some(DeferredAction::Delete));
        assert_eq!(shard.elided(), 0);
    }

    #[test]
    fn recreate_after_delete_flushes_and_recancel_still_deletes() {
        let mut shard = shard();
        let id = AccountId::new();
        shard.cancel(id);
        shard.stage_created(id, 1);
        assert_eq!(shard.pending_action(id), Some(DeferredAction::Flush));
        assert_eq!(shard.staged(id).map(|s| s.balance), Some(dec!(0.00)));
        // Replacing a deleted copy is not a duplicate.
        assert!(shard.unverified_creates().is_empty());

        // The committed copy still has to go.
        assert_eq!(shard.cancel(id), CancelOutcome::DeleteScheduled);
        assert_eq!(shard.pending_action(id), Some(DeferredAction::Delete));
    }

    #[test]
    fn unverified_creates_are_listed_in_position_order() {
        let mut shard = shard();
        let (a, b, c) = (AccountId::new(), AccountId::new(), AccountId::new());
        shard.stage_created(b, 7);
        shard.stage_created(a, 3);
        shard.stage_loaded(AccountSummary::open(c));

        assert_eq!(shard.unverified_creates(), vec![(a, 3), (b, 7)]);
    }

    #[test]
    fn mutations_keep_a_single_action() {
        let mut shard = shard();
        let id = AccountId::new();
        shard.stage_created(id, 0);
        if let Some(summary) = shard.staged_mut(id) {
            assert!(summary.credit(dec!(1.00)).is_ok());
            assert!(summary.credit(dec!(2.00)).is_ok());
        }
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.staged(id).map(|s| s.balance), Some(dec!(3.00)));
    }

    #[test]
    fn commit_batch_has_one_action_per_account() {
        let mut cache = StateCache::open(2).into_shards();
        let a = AccountId::new();
        let b = AccountId::new();
        let c = AccountId::new();
        if let Some(first) = cache.first_mut() {
            first.stage_created(a, 0);
            first.cancel(b);
        }
        if let Some(second) = cache.get_mut(1) {
            second.stage_created(c, 2);
            second.cancel(c);
        }

        let cache = StateCache::from_shards(cache);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.elided(), 1);

        let batch = cache.into_commit_batch("account-summary", 1, 42);
        assert_eq!(batch.position, 42);
        assert_eq!(batch.puts(), 1);
        assert_eq!(batch.deletes(), 1);
        assert!(batch.actions.contains(&CommitAction::Put(AccountSummary::open(a))));
        assert!(batch.actions.contains(&CommitAction::Delete(b)));
    }

    #[test]
    fn from_shards_restores_lane_order() {
        let shards = vec![LaneShard::new(LaneId(2)), LaneShard::new(LaneId(0)), LaneShard::new(LaneId(1))];
        let cache = StateCache::from_shards(shards);
        let lanes: Vec<LaneId> = cache.into_shards().iter().map(LaneShard::lane).collect();
        assert_eq!(lanes, vec![LaneId(0), LaneId(1), LaneId(2)]);
    }
}
