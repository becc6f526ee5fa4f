//! Replay-optimized projection engine for the account summary read model.
//!
//! The engine consumes an ordered stream of [`AccountEvent`]s and maintains a
//! balance per account in a persistent store. It is built to make full
//! history replay fast: events are spread across independent lanes by
//! account key, and store writes are deferred and coalesced per batch instead
//! of being written through on every event.
//!
//! # Architecture
//!
//! ```text
//! EventSource
//!     |
//!     +-- Partitioner (account key -> lane)
//!     |
//!     +-- lane queue 0 --> ProjectionWorker 0 --+
//!     +-- lane queue 1 --> ProjectionWorker 1 --+-- LaneShard (StateCache)
//!     +-- ...                                   |
//!     |                                         v
//!     +-- BatchCoordinator (batch boundary) --> AccountStore::commit
//! ```
//!
//! # Guarantees
//!
//! - Events for one account are applied in submission order; nothing is
//!   promised across accounts.
//! - At most one store action per account per batch: a flush of the final
//!   staged value, or a delete. Create-then-cancel within a batch costs
//!   nothing.
//! - A batch commits atomically together with its read position, so a
//!   restart resumes after the last committed batch and never re-applies a
//!   committed event.
//! - `Created` never overwrites a committed account: each surviving create
//!   is checked against the store before its batch commits.
//!
//! [`ProjectionMode::WriteThrough`] turns the staging off and writes every
//! event through to the store, for comparison runs against the batched
//! path.
//!
//! # Modules
//!
//! - [`partition`] -- Stable lane assignment
//! - [`cache`] -- Batch-scoped, lane-sharded staged state
//! - [`worker`] -- Per-lane event application state machine
//! - [`coordinator`] -- Batch boundaries, lane orchestration, commit
//! - [`store`] -- Persistent store contract and in-memory adapter
//! - [`source`] -- Event source contract and in-memory/channel sources
//! - [`retry`] -- Bounded retry around store I/O
//! - [`stats`] -- Replay counters
//! - [`config`] -- Engine tuning knobs
//! - [`error`] -- Error taxonomy
//!
//! [`AccountEvent`]: replay_types::AccountEvent

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod partition;
pub mod retry;
pub mod source;
pub mod stats;
pub mod store;
pub mod worker;

// Re-export primary types at crate root.
pub use cache::{CancelOutcome, CommitAction, CommitBatch, DeferredAction, LaneShard, StateCache};
pub use config::{ProjectionConfig, ProjectionMode};
pub use coordinator::{BatchCoordinator, BatchReport, RunSummary};
pub use error::{BatchError, ConfigError, PartitionError, ProjectionError, SourceError, StoreError};
pub use partition::{LaneId, Partitioner};
pub use source::{ChannelEventSource, EventSource, InMemoryEventLog};
pub use stats::{ReplayStats, StatsSnapshot};
pub use store::{AccountStore, InMemoryStore, KeyCalls};
pub use worker::{ProjectionWorker, WorkerState};
