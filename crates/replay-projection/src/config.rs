//! Tuning knobs of the projection engine.
//!
//! [`ProjectionConfig`] is deserialized from the `projection` section of
//! `replay-config.yaml`. Every field has a default, so an empty section is a
//! valid configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::partition::Partitioner;
use crate::retry::RetryPolicy;

/// How lanes reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    /// Stage every change and write one action per account at commit.
    #[default]
    Batched,
    /// Read, write or delete the account on every event, like a plain
    /// projector. Only the read position is committed per batch, so a failed
    /// batch keeps the writes it already made.
    WriteThrough,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectionConfig {
    /// Name under which the read position is committed.
    #[serde(default = "default_projection_name")]
    pub projection_name: String,

    /// Number of ordering lanes (one worker each).
    #[serde(default = "default_lanes")]
    pub lanes: u32,

    /// Maximum events per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time a batch stays open, in milliseconds.
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Retries after a failed store operation (0 = single attempt).
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    /// Base backoff between retries, in milliseconds. Attempt `n` waits
    /// `n * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Capacity of each lane's inbound queue.
    #[serde(default = "default_lane_queue_capacity")]
    pub lane_queue_capacity: usize,

    /// Batched staging or per-event write-through.
    #[serde(default)]
    pub mode: ProjectionMode,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            projection_name: default_projection_name(),
            lanes: default_lanes(),
            batch_size: default_batch_size(),
            batch_window_ms: default_batch_window_ms(),
            commit_retries: default_commit_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            lane_queue_capacity: default_lane_queue_capacity(),
            mode: ProjectionMode::default(),
        }
    }
}

impl ProjectionConfig {
    /// Check every knob and build the partitioner.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Partition`] for a zero lane count and
    /// [`ConfigError::Invalid`] for any other out-of-range value.
    pub fn validate(&self) -> Result<Partitioner, ConfigError> {
        if self.projection_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "projection_name",
                reason: "must not be blank",
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1",
            });
        }
        if self.batch_window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_window_ms",
                reason: "must be at least 1",
            });
        }
        if self.lane_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "lane_queue_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(Partitioner::new(self.lanes)?)
    }

    /// The batch time window.
    pub const fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// The retry policy around store I/O.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.commit_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

fn default_projection_name() -> String {
    "account-summary".to_owned()
}

const fn default_lanes() -> u32 {
    8
}

const fn default_batch_size() -> usize {
    1000
}

const fn default_batch_window_ms() -> u64 {
    250
}

const fn default_commit_retries() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    50
}

const fn default_lane_queue_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PartitionError;

    #[test]
    fn defaults_are_valid() {
        let config = ProjectionConfig::default();
        let partitioner = config.validate();
        assert_eq!(partitioner.map(|p| p.lane_count()), Ok(8));
        assert_eq!(config.mode, ProjectionMode::Batched);
    }

    #[test]
    fn empty_yaml_section_uses_defaults() {
        let parsed: Result<ProjectionConfig, _> = serde_yml::from_str("{}");
        assert_eq!(parsed.ok(), Some(ProjectionConfig::default()));
    }

    #[test]
    fn yaml_overrides_fields() {
        let yaml = "lanes: 4\nbatch_size: 50\nmode: write_through\n";
        let parsed: Result<ProjectionConfig, _> = serde_yml::from_str(yaml);
        let config = parsed.unwrap_or_default();
        assert_eq!(config.lanes, 4);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.mode, ProjectionMode::WriteThrough);
        assert_eq!(config.batch_window_ms, 250);
    }

    #[test]
    fn zero_lanes_is_a_partition_error() {
        let config = ProjectionConfig {
            lanes: 0,
            ..ProjectionConfig::default()
        };
        assert_eq!(
            config.validate().err(),
            Some(ConfigError::Partition(PartitionError::ZeroLanes))
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = ProjectionConfig {
            batch_size: 0,
            ..ProjectionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "batch_size",
                ..
            })
        ));
    }
}
