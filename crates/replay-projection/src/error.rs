//! Error taxonomy of the projection engine.
//!
//! Entity-level and batch-level errors are never recovered by skipping the
//! offending event. The only recovery path is a bounded retry around store
//! I/O; everything else halts the batch and surfaces to the operator.

use replay_types::{AccountId, EventDecodeError, MoneyError};
use rust_decimal::Decimal;

use crate::partition::LaneId;

/// Invalid lane configuration or an unpartitionable key.
///
/// Always fatal at startup, never retried per event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// The configured lane count is zero.
    #[error("lane count must be at least 1")]
    ZeroLanes,

    /// The key has no usable canonical form.
    #[error("malformed partition key: {key:?}")]
    MalformedKey {
        /// The offending key.
        key: String,
    },
}

/// Invalid engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The lane configuration is invalid.
    #[error("partition config error: {0}")]
    Partition(#[from] PartitionError),

    /// A numeric knob is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// The configuration field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Failure talking to the persistent store.
///
/// Every commit action is a final-state overwrite or a delete, so the whole
/// action set of a batch is safe to resubmit after this error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// An I/O operation against the backend failed.
    #[error("store {operation} failed: {message}")]
    Io {
        /// The operation that failed (`get`, `put`, `delete`, `commit`, ...).
        operation: &'static str,
        /// Backend-specific description.
        message: String,
    },

    /// The backend returned data that cannot be decoded.
    #[error("store returned corrupt data: {0}")]
    Corrupt(String),
}

/// Failure reading from the event source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// An event could not be decoded, so its key cannot be extracted.
    #[error("malformed event at position {position}: {source}")]
    Malformed {
        /// Position of the undecodable event.
        position: u64,
        /// The decode failure.
        source: EventDecodeError,
    },

    /// The source is unreachable.
    #[error("event source unavailable: {0}")]
    Unavailable(String),

    /// The source cannot rewind to the requested position.
    #[error("cannot replay from position {requested}; source is at {current}")]
    NotReplayable {
        /// The requested start position.
        requested: u64,
        /// The earliest position the source can still deliver.
        current: u64,
    },
}

/// Consistency violation while applying an event to a lane.
///
/// Fatal to the containing batch.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// `Created` for an account that is already staged or stored.
    #[error("account {account_id} already exists (lane {lane}, position {position})")]
    DuplicateEntity {
        /// The duplicated account.
        account_id: AccountId,
        /// The lane that saw the event.
        lane: LaneId,
        /// Position of the offending event.
        position: u64,
    },

    /// A credit or debit for an account with no staged or stored state.
    #[error("account {account_id} is unknown (lane {lane}, position {position})")]
    UnknownEntity {
        /// The missing account.
        account_id: AccountId,
        /// The lane that saw the event.
        lane: LaneId,
        /// Position of the offending event.
        position: u64,
    },

    /// A credit or debit whose amount is not strictly positive.
    #[error("amount {amount} for account {account_id} is not positive (position {position})")]
    InvalidAmount {
        /// The account the event refers to.
        account_id: AccountId,
        /// The rejected amount.
        amount: Decimal,
        /// Position of the offending event.
        position: u64,
    },

    /// Balance arithmetic overflowed.
    #[error("balance arithmetic failed for account {account_id}: {source}")]
    Balance {
        /// The account being mutated.
        account_id: AccountId,
        /// The arithmetic failure.
        source: MoneyError,
    },

    /// Reading the stored entity failed after all retries.
    #[error("reading account {account_id} failed: {source}")]
    StoreRead {
        /// The account being read.
        account_id: AccountId,
        /// The store failure.
        source: StoreError,
    },

    /// A write-through put or delete failed after all retries.
    #[error("writing account {account_id} failed: {source}")]
    StoreWrite {
        /// The account being written.
        account_id: AccountId,
        /// The store failure.
        source: StoreError,
    },

    /// The lane received events without an open batch.
    #[error("lane {lane} received an event outside of an open batch")]
    NoOpenBatch {
        /// The lane.
        lane: LaneId,
    },
}

/// A fatal batch outcome. The engine halts instead of continuing with an
/// inconsistent read model.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Engine configuration is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An event could not be applied.
    #[error("projection error in batch {batch}: {source}")]
    Projection {
        /// Sequence number of the failed batch.
        batch: u64,
        /// The underlying violation.
        source: ProjectionError,
    },

    /// The event source failed.
    #[error("event source error: {0}")]
    Source(#[from] SourceError),

    /// The commit kept failing after every retry. Intake is halted.
    #[error("commit of batch {batch} failed after {attempts} attempts: {source}")]
    CommitExhausted {
        /// Sequence number of the failed batch.
        batch: u64,
        /// Number of commit attempts made.
        attempts: u32,
        /// The last store failure.
        source: StoreError,
    },

    /// A store operation outside of commit failed after every retry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A lane worker stopped unexpectedly.
    #[error("lane {lane} is no longer running")]
    LaneUnavailable {
        /// The lane whose worker is gone.
        lane: LaneId,
    },
}

impl BatchError {
    /// Whether the error is a consistency violation (duplicate or unknown
    /// entity) rather than an infrastructure failure.
    pub const fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            Self::Projection {
                source: ProjectionError::DuplicateEntity { .. }
                    | ProjectionError::UnknownEntity { .. },
                ..
            }
        )
    }
}
