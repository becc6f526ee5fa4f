//! Document-style adapter: account summaries as JSON in `Dragonfly`.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `account:{id}:summary` | JSON | Committed [`AccountSummary`] |
//! | `projection:{name}:position` | Integer | Last committed event position |
//!
//! A batch commit queues every `SET`/`DEL` plus the position `SET` in one
//! `MULTI`/`EXEC` block, so other clients never observe half a batch.

use fred::prelude::*;
use fred::types::Value;
use replay_projection::{AccountStore, CommitAction, CommitBatch, StoreError};
use replay_types::{AccountId, AccountSummary};

use crate::dragonfly::DragonflyPool;
use crate::error::DbError;

fn summary_key(account_id: AccountId) -> String {
    format!("account:{account_id}:summary")
}

fn position_key(projection: &str) -> String {
    format!("projection:{projection}:position")
}

/// [`AccountStore`] backed by `Dragonfly` key-value documents.
#[derive(Clone)]
pub struct DragonflyAccountStore {
    pool: DragonflyPool,
}

impl DragonflyAccountStore {
    /// Create a store over a connected pool.
    pub const fn new(pool: DragonflyPool) -> Self {
        Self { pool }
    }

    /// The underlying connection.
    pub const fn pool(&self) -> &DragonflyPool {
        &self.pool
    }

    /// Read one summary.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read or decoding fails.
    pub async fn fetch(&self, account_id: AccountId) -> Result<Option<AccountSummary>, DbError> {
        self.pool.get_json(&summary_key(account_id)).await
    }

    /// The committed position of `projection`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] if the stored value is not a `u64`.
    pub async fn position(&self, projection: &str) -> Result<Option<u64>, DbError> {
        let key = position_key(projection);
        self.pool
            .get_string(&key)
            .await?
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|e| DbError::Corrupt(format!("{key} is not a valid u64: {e}")))
            })
            .transpose()
    }

    /// Apply a batch and its position in one `MULTI`/`EXEC` block.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization fails or the transaction is
    /// rejected. Nothing is queued server-side before `EXEC`.
    pub async fn commit_batch(&self, batch: &CommitBatch) -> Result<(), DbError> {
        let trx = self.pool.client().multi();
        for action in &batch.actions {
            match action {
                CommitAction::Put(summary) => {
                    let json = serde_json::to_string(summary)?;
                    let _: () = trx
                        .set(summary_key(summary.account_id), json.as_str(), None, None, false)
                        .await?;
                }
                CommitAction::Delete(account_id) => {
                    let _: () = trx.del(summary_key(*account_id)).await?;
                }
            }
        }
        let _: () = trx
            .set(
                position_key(&batch.projection),
                batch.position.to_string().as_str(),
                None,
                None,
                false,
            )
            .await?;
        let _: Value = trx.exec(true).await?;

        tracing::debug!(
            batch = batch.sequence,
            actions = batch.actions.len(),
            position = batch.position,
            "Committed batch to Dragonfly"
        );
        Ok(())
    }
}

impl AccountStore for DragonflyAccountStore {
    async fn get(&self, account_id: AccountId) -> Result<Option<AccountSummary>, StoreError> {
        self.fetch(account_id)
            .await
            .map_err(|e| e.into_store_error("get"))
    }

    async fn put(&self, summary: &AccountSummary) -> Result<(), StoreError> {
        self.pool
            .set_json(&summary_key(summary.account_id), summary)
            .await
            .map_err(|e| e.into_store_error("put"))
    }

    async fn delete(&self, account_id: AccountId) -> Result<(), StoreError> {
        self.pool
            .delete(&summary_key(account_id))
            .await
            .map_err(|e| e.into_store_error("delete"))
    }

    async fn load_position(&self, projection: &str) -> Result<Option<u64>, StoreError> {
        self.position(projection)
            .await
            .map_err(|e| e.into_store_error("load_position"))
    }

    async fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        self.commit_batch(batch)
            .await
            .map_err(|e| e.into_store_error("commit"))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn keys_follow_documented_patterns() {
        let id = AccountId::from(Uuid::nil());
        assert_eq!(
            summary_key(id),
            "account:00000000-0000-0000-0000-000000000000:summary"
        );
        assert_eq!(position_key("account-summary"), "projection:account-summary:position");
    }
}
