//! Persistence adapters for the replay projection engine.
//!
//! The projection only knows the [`AccountStore`] and [`EventSource`]
//! traits. This crate provides the production implementations:
//!
//! ```text
//! BatchCoordinator
//!     |
//!     +-- AccountStore
//!     |     |-- PgAccountStore        (relational, one SQL transaction per batch)
//!     |     +-- DragonflyAccountStore (document-style, MULTI/EXEC per batch)
//!     |
//!     +-- EventSource
//!           +-- PgEventLog            (paged replay of account_events)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool, configuration, migrations
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) connection handle
//! - [`account_store`] -- Account summaries in `PostgreSQL`
//! - [`dragonfly_store`] -- Account summaries in `Dragonfly`
//! - [`event_log`] -- Replayable event log in `PostgreSQL`
//! - [`error`] -- Shared error types
//!
//! [`AccountStore`]: replay_projection::AccountStore
//! [`EventSource`]: replay_projection::EventSource

pub mod account_store;
pub mod dragonfly;
pub mod dragonfly_store;
pub mod error;
pub mod event_log;
pub mod postgres;

// Re-export primary types for convenience.
pub use account_store::{AccountSummaryRow, PgAccountStore};
pub use dragonfly::DragonflyPool;
pub use dragonfly_store::DragonflyAccountStore;
pub use error::DbError;
pub use event_log::{AccountEventRow, PgEventLog};
pub use postgres::{PostgresConfig, PostgresPool};
