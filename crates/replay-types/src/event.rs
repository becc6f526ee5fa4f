//! Account events and their wire representation.
//!
//! [`AccountEvent`] is a closed tagged variant: every consumer matches on it
//! exhaustively, so adding a variant is a compile error everywhere it is
//! handled rather than a silently ignored message.
//!
//! # Wire shapes
//!
//! | Variant | Fields |
//! |---------|--------|
//! | `created` | `account_id` |
//! | `credited` | `account_id`, `amount` |
//! | `debited` | `account_id`, `amount` |
//! | `cancelled` | `account_id` |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::AccountId;

/// Errors raised while decoding an event from its wire form.
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    /// The payload is not valid JSON or does not match any variant.
    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The event type column holds an unknown discriminator.
    #[error("unknown event type: {0}")]
    UnknownKind(String),

    /// A credit or debit arrived without an amount.
    #[error("{kind} event for account {account_id} is missing its amount")]
    MissingAmount {
        /// The event type that requires an amount.
        kind: EventKind,
        /// The account the event refers to.
        account_id: AccountId,
    },
}

/// Discriminator of an [`AccountEvent`], as stored in columnar event logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Account opened.
    Created,
    /// Funds added.
    Credited,
    /// Funds removed.
    Debited,
    /// Account closed.
    Cancelled,
}

impl EventKind {
    /// The database string for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Credited => "credited",
            Self::Debited => "debited",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a kind from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::UnknownKind`] for anything else.
    pub fn parse(s: &str) -> Result<Self, EventDecodeError> {
        match s {
            "created" => Ok(Self::Created),
            "credited" => Ok(Self::Credited),
            "debited" => Ok(Self::Debited),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EventDecodeError::UnknownKind(other.to_owned())),
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event against a single account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountEvent {
    /// The account does not exist yet and is opened at `0.00`.
    Created {
        /// The new account.
        account_id: AccountId,
    },
    /// `amount` is added to the balance.
    Credited {
        /// The credited account.
        account_id: AccountId,
        /// Strictly positive amount, scale 2.
        amount: Decimal,
    },
    /// `amount` is subtracted from the balance.
    Debited {
        /// The debited account.
        account_id: AccountId,
        /// Strictly positive amount, scale 2.
        amount: Decimal,
    },
    /// The account ceases to exist.
    Cancelled {
        /// The cancelled account.
        account_id: AccountId,
    },
}

impl AccountEvent {
    /// The account this event applies to.
    pub const fn account_id(&self) -> AccountId {
        match self {
            Self::Created { account_id }
            | Self::Credited { account_id, .. }
            | Self::Debited { account_id, .. }
            | Self::Cancelled { account_id } => *account_id,
        }
    }

    /// The discriminator of this event.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Created { .. } => EventKind::Created,
            Self::Credited { .. } => EventKind::Credited,
            Self::Debited { .. } => EventKind::Debited,
            Self::Cancelled { .. } => EventKind::Cancelled,
        }
    }

    /// The amount carried by credits and debits.
    pub const fn amount(&self) -> Option<Decimal> {
        match self {
            Self::Credited { amount, .. } | Self::Debited { amount, .. } => Some(*amount),
            Self::Created { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// Rebuild an event from columnar storage (`event_type`, `account_id`, `amount`).
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError`] if the kind is unknown or a credit/debit
    /// has no amount.
    pub fn from_columns(
        kind: &str,
        account_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<Self, EventDecodeError> {
        let account_id = AccountId::from(account_id);
        let kind = EventKind::parse(kind)?;
        let require_amount =
            || amount.ok_or(EventDecodeError::MissingAmount { kind, account_id });
        Ok(match kind {
            EventKind::Created => Self::Created { account_id },
            EventKind::Credited => Self::Credited {
                account_id,
                amount: require_amount()?,
            },
            EventKind::Debited => Self::Debited {
                account_id,
                amount: require_amount()?,
            },
            EventKind::Cancelled => Self::Cancelled { account_id },
        })
    }

    /// Decode an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::Json`] if the payload is malformed.
    pub fn from_json(payload: &str) -> Result<Self, EventDecodeError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// An event together with its position in the source stream.
///
/// Positions are strictly increasing within a source; the projection
/// commits the last applied position together with each batch so a restart
/// resumes exactly after the last committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Position of the event in its source.
    pub position: u64,
    /// When the event was recorded by the source.
    pub recorded_at: DateTime<Utc>,
    /// The event itself.
    pub event: AccountEvent,
}

impl EventEnvelope {
    /// Wrap `event` at `position`, stamped with the current time.
    pub fn new(position: u64, event: AccountEvent) -> Self {
        Self {
            position,
            recorded_at: Utc::now(),
            event,
        }
    }
}
