//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors. At the engine seam they are converted into
//! the projection's [`StoreError`] or [`SourceError`].

use replay_projection::{SourceError, StoreError};

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data violates the expected shape.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Convert into a [`StoreError`] for the failed `operation`.
    pub fn into_store_error(self, operation: &'static str) -> StoreError {
        match self {
            Self::Corrupt(message) => StoreError::Corrupt(message),
            Self::Serialization(e) => StoreError::Corrupt(e.to_string()),
            other => StoreError::Io {
                operation,
                message: other.to_string(),
            },
        }
    }
}

impl From<DbError> for SourceError {
    fn from(error: DbError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_data_is_not_reported_as_io() {
        let err = DbError::Corrupt(String::from("negative position")).into_store_error("load_position");
        assert_eq!(err, StoreError::Corrupt(String::from("negative position")));
    }

    #[test]
    fn config_error_maps_to_io_with_operation() {
        let err = DbError::Config(String::from("bad url")).into_store_error("commit");
        assert!(matches!(err, StoreError::Io { operation: "commit", .. }));
    }
}
