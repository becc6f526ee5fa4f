//! Relational adapter: account summaries in `PostgreSQL`.
//!
//! A batch commit runs as one SQL transaction: all flushes as a single
//! UNNEST upsert, all deletes as a single `= ANY` delete, and the read
//! position upsert. Either everything lands or nothing does.

use replay_projection::{AccountStore, CommitAction, CommitBatch, StoreError};
use replay_types::{AccountId, AccountSummary};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;

/// A row from the `account_summary` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountSummaryRow {
    /// Account primary key.
    pub account_id: Uuid,
    /// Balance at two decimal places.
    pub balance: Decimal,
}

impl From<AccountSummaryRow> for AccountSummary {
    fn from(row: AccountSummaryRow) -> Self {
        Self {
            account_id: AccountId::from(row.account_id),
            balance: row.balance,
        }
    }
}

/// [`AccountStore`] backed by the `account_summary` and
/// `projection_position` tables.
#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Create a store over an existing pool. Migrations must have run.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read one summary.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn fetch(&self, account_id: AccountId) -> Result<Option<AccountSummary>, DbError> {
        let row = sqlx::query_as::<_, AccountSummaryRow>(
            r"SELECT account_id, balance FROM account_summary WHERE account_id = $1",
        )
        .bind(account_id.into_inner())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AccountSummary::from))
    }

    /// Overwrite one summary outside of a batch.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn upsert(&self, summary: &AccountSummary) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO account_summary (account_id, balance, updated_at)
              VALUES ($1, $2, now())
              ON CONFLICT (account_id) DO UPDATE SET balance = EXCLUDED.balance, updated_at = now()",
        )
        .bind(summary.account_id.into_inner())
        .bind(summary.balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove one summary outside of a batch.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn remove(&self, account_id: AccountId) -> Result<(), DbError> {
        sqlx::query(r"DELETE FROM account_summary WHERE account_id = $1")
            .bind(account_id.into_inner())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The committed position of `projection`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] if the stored position is negative.
    pub async fn position(&self, projection: &str) -> Result<Option<u64>, DbError> {
        let position: Option<i64> = sqlx::query_scalar(
            r"SELECT position FROM projection_position WHERE projection = $1",
        )
        .bind(projection)
        .fetch_optional(&self.pool)
        .await?;
        position
            .map(|p| {
                u64::try_from(p).map_err(|e| {
                    DbError::Corrupt(format!("position of {projection} is {p}: {e}"))
                })
            })
            .transpose()
    }

    /// Apply a batch and its position in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any statement fails; the
    /// transaction is rolled back when dropped uncommitted.
    pub async fn commit_batch(&self, batch: &CommitBatch) -> Result<(), DbError> {
        let position = i64::try_from(batch.position).map_err(|e| {
            DbError::Config(format!("position {} exceeds BIGINT: {e}", batch.position))
        })?;

        let mut put_ids = Vec::with_capacity(batch.actions.len());
        let mut put_balances = Vec::with_capacity(batch.actions.len());
        let mut delete_ids = Vec::new();
        for action in &batch.actions {
            match action {
                CommitAction::Put(summary) => {
                    put_ids.push(summary.account_id.into_inner());
                    put_balances.push(summary.balance);
                }
                CommitAction::Delete(account_id) => delete_ids.push(account_id.into_inner()),
            }
        }

        let mut tx = self.pool.begin().await?;

        if !put_ids.is_empty() {
            sqlx::query(
                r"INSERT INTO account_summary (account_id, balance, updated_at)
                  SELECT account_id, balance, now() FROM UNNEST($1::UUID[], $2::NUMERIC[]) AS t(account_id, balance)
                  ON CONFLICT (account_id) DO UPDATE SET balance = EXCLUDED.balance, updated_at = now()",
            )
            .bind(&put_ids)
            .bind(&put_balances)
            .execute(&mut *tx)
            .await?;
        }

        if !delete_ids.is_empty() {
            sqlx::query(r"DELETE FROM account_summary WHERE account_id = ANY($1::UUID[])")
                .bind(&delete_ids)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r"INSERT INTO projection_position (projection, position, updated_at)
              VALUES ($1, $2, now())
              ON CONFLICT (projection) DO UPDATE SET position = EXCLUDED.position, updated_at = now()",
        )
        .bind(&batch.projection)
        .bind(position)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            batch = batch.sequence,
            puts = put_ids.len(),
            deletes = delete_ids.len(),
            position = batch.position,
            "Committed batch to PostgreSQL"
        );
        Ok(())
    }

    /// Number of stored summaries.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count(&self) -> Result<i64, DbError> {
        Ok(sqlx::query_scalar(r"SELECT COUNT(*) FROM account_summary")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Sum of all stored balances.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn total_balance(&self) -> Result<Decimal, DbError> {
        let total: Option<Decimal> =
            sqlx::query_scalar(r"SELECT SUM(balance) FROM account_summary")
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }
}

impl AccountStore for PgAccountStore {
    async fn get(&self, account_id: AccountId) -> Result<Option<AccountSummary>, StoreError> {
        self.fetch(account_id)
            .await
            .map_err(|e| e.into_store_error("get"))
    }

    async fn put(&self, summary: &AccountSummary) -> Result<(), StoreError> {
        self.upsert(summary)
            .await
            .map_err(|e| e.into_store_error("put"))
    }

    async fn delete(&self, account_id: AccountId) -> Result<(), StoreError> {
        self.remove(account_id)
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
