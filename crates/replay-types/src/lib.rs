//! Shared type definitions for the replay projection engine.
//!
//! This crate is the single source of truth for the read model and the
//! event vocabulary consumed by every other crate in the workspace.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifier for accounts
//! - [`money`] -- Fixed-point monetary rounding (scale 2, half-up)
//! - [`account`] -- The [`AccountSummary`] read model entity
//! - [`event`] -- The closed [`AccountEvent`] variant and its envelope

pub mod account;
pub mod event;
pub mod ids;
pub mod money;

// Re-export all public types at crate root for convenience.
pub use account::AccountSummary;
pub use event::{AccountEvent, EventDecodeError, EventEnvelope, EventKind};
pub use ids::AccountId;
pub use money::{MONEY_SCALE, MoneyError, round_money, zero_balance};
