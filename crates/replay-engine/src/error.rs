//! Error types for the replay engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and replay.

/// Top-level error for the replay engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: crate::config::ConfigError,
    },

    /// Projection tuning knobs were rejected.
    #[error("projection config error: {source}")]
    Projection {
        /// The underlying validation error.
        #[from]
        source: replay_projection::ConfigError,
    },

    /// A store or event log adapter failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying adapter error.
        #[from]
        source: replay_db::DbError,
    },

    /// The load generator was misconfigured.
    #[error("loader error: {source}")]
    Loader {
        /// The underlying loader error.
        #[from]
        source: replay_loadgen::LoaderError,
    },

    /// The replay stopped at a failed batch.
    #[error("replay error: {source}")]
    Replay {
        /// The underlying batch error.
        #[from]
        source: replay_projection::BatchError,
    },

    /// A component needs `PostgreSQL` but no connection was configured.
    #[error("setup error: {message}")]
    Setup {
        /// Description of the setup failure.
        message: String,
    },
}
