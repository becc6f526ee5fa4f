//! Replayable account event log in `PostgreSQL`.
//!
//! Events live in `account_events`, ordered by a `BIGSERIAL` position.
//! Appends are batched with UNNEST; reads are paged by position so a full
//! replay never holds more than one page in memory.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use replay_projection::{EventSource, SourceError};
use replay_types::{AccountEvent, EventEnvelope};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;

/// Default number of rows fetched per page.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of rows per append statement.
const DEFAULT_APPEND_CHUNK: usize = 5000;

/// A row from the `account_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountEventRow {
    /// Log position.
    pub position: i64,
    /// `created`, `credited`, `debited` or `cancelled`.
    pub event_type: String,
    /// The account the event refers to.
    pub account_id: Uuid,
    /// Amount of a credit or debit.
    pub amount: Option<Decimal>,
    /// When the event was appended.
    pub recorded_at: DateTime<Utc>,
}

impl AccountEventRow {
    /// Decode the row into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Malformed`] if the row does not describe a
    /// valid event.
    pub fn into_envelope(self) -> Result<EventEnvelope, SourceError> {
        let position = u64::try_from(self.position).map_err(|e| {
            SourceError::Unavailable(format!("negative event position {}: {e}", self.position))
        })?;
        let event = AccountEvent::from_columns(&self.event_type, self.account_id, self.amount)
            .map_err(|source| SourceError::Malformed { position, source })?;
        Ok(EventEnvelope {
            position,
            recorded_at: self.recorded_at,
            event,
        })
    }
}

/// [`EventSource`] reading `account_events` in position order.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
    page_size: usize,
    next_position: i64,
    buffer: VecDeque<EventEnvelope>,
}

impl PgEventLog {
    /// Create a log reader starting at the beginning of the log.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
            next_position: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Set the number of rows fetched per page.
    #[must_use]
    pub const fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = if size == 0 { 1 } else { size };
        self
    }

    /// Append events in order and return their positions.
    ///
    /// Each chunk is inserted with a single UNNEST statement inside a
    /// transaction, so positions within a chunk are contiguous.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn append_batch(&self, events: &[AccountEvent]) -> Result<Vec<u64>, DbError> {
        let mut positions = Vec::with_capacity(events.len());
        for chunk in events.chunks(DEFAULT_APPEND_CHUNK) {
            let mut tx = self.pool.begin().await?;

            let len = chunk.len();
            let mut ordinals = Vec::with_capacity(len);
            let mut kinds = Vec::with_capacity(len);
            let mut account_ids = Vec::with_capacity(len);
            let mut amounts: Vec<Option<Decimal>> = Vec::with_capacity(len);

            for (ordinal, event) in (0_i64..).zip(chunk) {
                ordinals.push(ordinal);
                kinds.push(event.kind().as_str().to_owned());
                account_ids.push(event.account_id().into_inner());
                amounts.push(event.amount());
            }

            let inserted: Vec<i64> = sqlx::query_scalar(
                r"INSERT INTO account_events (event_type, account_id, amount)
                  SELECT event_type, account_id, amount
                  FROM UNNEST($1::BIGINT[], $2::TEXT[], $3::UUID[], $4::NUMERIC[])
                       AS t(ordinal, event_type, account_id, amount)
                  ORDER BY ordinal
                  RETURNING position",
            )
            .bind(&ordinals)
            .bind(&kinds)
            .bind(&account_ids)
            .bind(&amounts)
            .fetch_all(&mut *tx)
            .await?;

            tx.commit().await?;

            let mut inserted = inserted
                .into_iter()
                .map(|p| {
                    u64::try_from(p)
                        .map_err(|e| DbError::Corrupt(format!("negative position {p}: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            inserted.sort_unstable();
            positions.extend(inserted);
        }

        tracing::debug!(count = events.len(), "Appended account events (batch UNNEST)");
        Ok(positions)
    }

    /// Position of the newest event, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn head_position(&self) -> Result<Option<u64>, DbError> {
        let head: Option<i64> = sqlx::query_scalar(r"SELECT MAX(position) FROM account_events")
            .fetch_one(&self.pool)
            .await?;
        head.map(|p| {
            u64::try_from(p).map_err(|e| DbError::Corrupt(format!("negative position {p}: {e}")))
        })
        .transpose()
    }

    async fn fetch_page(&self) -> Result<Vec<AccountEventRow>, DbError> {
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);
        Ok(sqlx::query_as::<_, AccountEventRow>(
            r"SELECT position, event_type, account_id, amount, recorded_at
              FROM account_events
              WHERE position >= $1
              ORDER BY position
              LIMIT $2",
        )
        .bind(self.next_position)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

impl EventSource for PgEventLog {
    async fn seek(&mut self, position: u64) -> Result<(), SourceError> {
        self.next_position = i64::try_from(position).unwrap_or(i64::MAX);
        self.buffer.clear();
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<EventEnvelope>, SourceError> {
        if self.buffer.is_empty() {
            // Nothing is consumed until the page has fully arrived.
            let rows = self.fetch_page().await?;
            for row in rows {
                let envelope = row.into_envelope()?;
                self.next_position = i64::try_from(envelope.position)
                    .unwrap_or(i64::MAX)
                    .saturating_add(1);
                self.buffer.push_back(envelope);
            }
        }
        Ok(self.buffer.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn row(event_type: &str, amount: Option<Decimal>) -> AccountEventRow {
        AccountEventRow {
            position: 12,
            event_type: event_type.to_owned(),
            account_id: Uuid::nil(),
            amount,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn row_decodes_into_envelope() {
        let envelope = row("debited", Some(dec!(3.00))).into_envelope();
        assert!(matches!(
            envelope,
            Ok(EventEnvelope {
                position: 12,
                event: AccountEvent::Debited { .. },
                ..
            })
        ));
    }

    #[test]
    fn credit_without_amount_is_malformed() {
        let err = row("credited", None).into_envelope();
        assert!(matches!(err, Err(SourceError::Malformed { position: 12, .. })));
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = row("frozen", None).into_envelope();
        assert!(matches!(err, Err(SourceError::Malformed { .. })));
    }
}
