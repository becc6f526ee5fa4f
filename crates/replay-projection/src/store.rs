//! Persistent store contract and the in-memory adapter.
//!
//! The engine only ever talks to the store through [`AccountStore`]. During
//! a batch, lanes issue point reads (`get`); at the batch boundary the
//! coordinator hands the whole action set, together with the new read
//! position, to [`AccountStore::commit`], which must apply it atomically.

use std::collections::{HashMap, VecDeque};
use std::future::Future;

use replay_types::{AccountId, AccountSummary};
use tokio::sync::Mutex;

use crate::cache::{CommitAction, CommitBatch};
use crate::error::StoreError;

/// Key-value persistence for account summaries and projection positions.
///
/// Implementations must be safe to share between lanes. Every write is a
/// final-state overwrite or a delete, so callers may resubmit any call
/// after a [`StoreError`].
pub trait AccountStore: Send + Sync + 'static {
    /// Read the stored summary of `account_id`.
    fn get(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = Result<Option<AccountSummary>, StoreError>> + Send;

    /// Overwrite the stored summary of one account.
    fn put(&self, summary: &AccountSummary) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove the stored summary of one account. Deleting a missing key is
    /// not an error.
    fn delete(&self, account_id: AccountId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Position of the last committed event for `projection`, or `None`
    /// when nothing was ever committed.
    fn load_position(
        &self,
        projection: &str,
    ) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;

    /// Apply every action of `batch` and record `batch.position`, all or
    /// nothing.
    fn commit(&self, batch: &CommitBatch) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Per-key call counts recorded by [`InMemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyCalls {
    /// Point reads.
    pub gets: u32,
    /// Overwrites, direct or through a committed batch.
    pub puts: u32,
    /// Deletes, direct or through a committed batch.
    pub deletes: u32,
}

impl KeyCalls {
    /// Writes of any kind.
    pub const fn writes(&self) -> u32 {
        self.puts.saturating_add(self.deletes)
    }

    /// Calls of any kind.
    pub const fn total(&self) -> u32 {
        self.writes().saturating_add(self.gets)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<AccountId, AccountSummary>,
    positions: HashMap<String, u64>,
    calls: HashMap<AccountId, KeyCalls>,
    commits: u32,
    /// Each queued entry makes one commit fail after that many actions.
    commit_faults: VecDeque<usize>,
    get_faults: u32,
}

impl MemoryState {
    fn calls_mut(&mut self, account_id: AccountId) -> &mut KeyCalls {
        self.calls.entry(account_id).or_default()
    }

    fn apply(&mut self, action: &CommitAction) -> Option<AccountSummary> {
        match action {
            CommitAction::Put(summary) => {
                let calls = self.calls_mut(summary.account_id);
                calls.puts = calls.puts.saturating_add(1);
                self.accounts.insert(summary.account_id, summary.clone())
            }
            CommitAction::Delete(account_id) => {
                let calls = self.calls_mut(*account_id);
                calls.deletes = calls.deletes.saturating_add(1);
                self.accounts.remove(account_id)
            }
        }
    }

    fn undo(&mut self, account_id: AccountId, previous: Option<AccountSummary>) {
        match previous {
            Some(summary) => {
                self.accounts.insert(account_id, summary);
            }
            None => {
                self.accounts.remove(&account_id);
            }
        }
    }
}

/// An in-process [`AccountStore`] that records every call per key.
///
/// Besides serving as the default adapter for local runs, it lets tests
/// assert exactly which store calls a batch produced, and inject failures
/// into reads and commits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with committed summaries.
    ///
    /// Seeding does not show up in the call log.
    pub fn with_accounts(accounts: impl IntoIterator<Item = AccountSummary>) -> Self {
        let state = MemoryState {
            accounts: accounts
                .into_iter()
                .map(|summary| (summary.account_id, summary))
                .collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Set the committed position of `projection` without logging a call.
    pub async fn seed_position(&self, projection: &str, position: u64) {
        self.state
            .lock()
            .await
            .positions
            .insert(projection.to_owned(), position);
    }

    /// Make the next commit fail after applying `applied` of its actions.
    /// The partial writes are rolled back before the error is returned.
    /// Calls queue up: each one affects one commit attempt.
    pub async fn fail_next_commit_after(&self, applied: usize) {
        self.state.lock().await.commit_faults.push_back(applied);
    }

    /// Make the next `count` reads fail.
    pub async fn fail_next_gets(&self, count: u32) {
        let mut state = self.state.lock().await;
        state.get_faults = state.get_faults.saturating_add(count);
    }

    /// The committed summary of `account_id`.
    pub async fn account(&self, account_id: AccountId) -> Option<AccountSummary> {
        self.state.lock().await.accounts.get(&account_id).cloned()
    }

    /// Every committed summary.
    pub async fn accounts(&self) -> Vec<AccountSummary> {
        self.state.lock().await.accounts.values().cloned().collect()
    }

    /// The committed position of `projection`.
    pub async fn position(&self, projection: &str) -> Option<u64> {
        self.state.lock().await.positions.get(projection).copied()
    }

    /// Calls recorded for `account_id`.
    pub async fn calls_for(&self, account_id: AccountId) -> KeyCalls {
        self.state
            .lock()
            .await
            .calls
            .get(&account_id)
            .copied()
            .unwrap_or_default()
    }

    /// Calls recorded across all keys.
    pub async fn total_calls(&self) -> KeyCalls {
        self.state
            .lock()
            .await
            .calls
            .values()
            .fold(KeyCalls::default(), |acc, calls| KeyCalls {
                gets: acc.gets.saturating_add(calls.gets),
                puts: acc.puts.saturating_add(calls.puts),
                deletes: acc.deletes.saturating_add(calls.deletes),
            })
    }

    /// Commit attempts made, successful or not.
    pub async fn commit_attempts(&self) -> u32 {
        self.state.lock().await.commits
    }
}

impl AccountStore for InMemoryStore {
    async fn get(&self, account_id: AccountId) -> Result<Option<AccountSummary>, StoreError> {
        let mut state = self.state.lock().await;
        let calls = state.calls_mut(account_id);
        calls.gets = calls.gets.saturating_add(1);
        if state.get_faults > 0 {
            state.get_faults = state.get_faults.saturating_sub(1);
            return Err(StoreError::Io {
                operation: "get",
                message: String::from("injected read failure"),
            });
        }
        Ok(state.accounts.get(&account_id).cloned())
    }

    async fn put(&self, summary: &AccountSummary) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .apply(&CommitAction::Put(summary.clone()));
        Ok(())
    }

    async fn delete(&self, account_id: AccountId) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .apply(&CommitAction::Delete(account_id));
        Ok(())
    }

    async fn load_position(&self, projection: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.state.lock().await.positions.get(projection).copied())
    }

    async fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.commits = state.commits.saturating_add(1);
        let fail_after = state.commit_faults.pop_front();

        let mut undo = Vec::with_capacity(batch.actions.len());
        for (applied, action) in batch.actions.iter().enumerate() {
            if fail_after == Some(applied) {
                break;
            }
            undo.push((action.account_id(), state.apply(action)));
        }

        if let Some(applied) = fail_after {
            for (account_id, previous) in undo.into_iter().rev() {
                state.undo(account_id, previous);
            }
            return Err(StoreError::Io {
                operation: "commit",
                message: format!("injected failure after {applied} actions"),
            });
        }

        state
            .positions
            .insert(batch.projection.clone(), batch.position);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn summary(balance: rust_decimal::Decimal) -> AccountSummary {
        AccountSummary {
            account_id: AccountId::new(),
            balance,
        }
    }

    fn batch(actions: Vec<CommitAction>, position: u64) -> CommitBatch {
        CommitBatch {
            projection: String::from("account-summary"),
            sequence: 1,
            position,
            actions,
        }
    }

    #[tokio::test]
    async fn commit_applies_actions_and_position() {
        let existing = summary(dec!(4.00));
        let store = InMemoryStore::with_accounts([existing.clone()]);
        let fresh = summary(dec!(1.50));

        store
            .commit(&batch(
                vec![
                    CommitAction::Put(fresh.clone()),
                    CommitAction::Delete(existing.account_id),
                ],
                9,
            ))
            .await
            .unwrap();

        assert_eq!(store.account(fresh.account_id).await, Some(fresh.clone()));
        assert_eq!(store.account(existing.account_id).await, None);
        assert_eq!(store.load_position("account-summary").await.unwrap(), Some(9));
        assert_eq!(store.calls_for(fresh.account_id).await.puts, 1);
        assert_eq!(store.calls_for(existing.account_id).await.deletes, 1);
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_partial_writes() {
        let kept = summary(dec!(10.00));
        let store = InMemoryStore::with_accounts([kept.clone()]);
        store.seed_position("account-summary", 3).await;
        store.fail_next_commit_after(2).await;

        let replaced = AccountSummary {
            account_id: kept.account_id,
            balance: dec!(99.00),
        };
        let added = summary(dec!(1.00));
        let other = summary(dec!(2.00));
        let result = store
            .commit(&batch(
                vec![
                    CommitAction::Put(replaced),
                    CommitAction::Put(added.clone()),
                    CommitAction::Put(other.clone()),
                ],
                7,
            ))
            .await;

        assert!(result.is_err());
        assert_eq!(store.account(kept.account_id).await, Some(kept));
        assert_eq!(store.account(added.account_id).await, None);
        assert_eq!(store.account(other.account_id).await, None);
        assert_eq!(store.position("account-summary").await, Some(3));

        // The fault is consumed; resubmitting succeeds.
        store
            .commit(&batch(vec![CommitAction::Put(other.clone())], 7))
            .await
            .unwrap();
        assert_eq!(store.account(other.account_id).await, Some(other));
        assert_eq!(store.commit_attempts().await, 2);
    }

    #[tokio::test]
    async fn injected_get_failures_are_consumed() {
        let store = InMemoryStore::new();
        let id = AccountId::new();
        store.fail_next_gets(1).await;
        assert!(store.get(id).await.is_err());
        assert_eq!(store.get(id).await.unwrap(), None);
        assert_eq!(store.calls_for(id).await.gets, 2);
    }

    #[tokio::test]
    async fn direct_put_and_delete_are_logged() {
        let store = InMemoryStore::new();
        let s = summary(dec!(3.00));
        store.put(&s).await.unwrap();
        store.delete(s.account_id).await.unwrap();
        store.delete(s.account_id).await.unwrap();
        let calls = store.calls_for(s.account_id).await;
        assert_eq!(calls, KeyCalls { gets: 0, puts: 1, deletes: 2 });
        assert_eq!(calls.writes(), 3);
        assert_eq!(store.total_calls().await.total(), 3);
    }
}
