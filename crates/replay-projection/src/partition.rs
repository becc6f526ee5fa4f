//! Stable lane assignment for account events.
//!
//! Upstream events carry no correlation metadata that could order them by
//! default, so every event is routed by its account key. The lane is a pure
//! function of the key's canonical string form: the same logical key maps to
//! the same lane in every process, on every restart, for every value of the
//! key constructed at any time.

use serde::{Deserialize, Serialize};

use replay_types::{AccountEvent, AccountId};

use crate::error::PartitionError;

/// 64-bit FNV-1a offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// 64-bit FNV-1a prime.
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Identifier of an ordering lane, `0..lane_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LaneId(pub u32);

impl LaneId {
    /// The lane as a vector index.
    pub fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl core::fmt::Display for LaneId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic hash of a partition key.
///
/// FNV-1a keeps the value stable across toolchains and processes, unlike the
/// randomly keyed std hasher.
pub fn hash_partition_key(key: impl AsRef<[u8]>) -> u64 {
    key.as_ref().iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Maps account keys to lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    lanes: u32,
}

impl Partitioner {
    /// Create a partitioner over `lanes` lanes.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::ZeroLanes`] if `lanes` is zero.
    pub const fn new(lanes: u32) -> Result<Self, PartitionError> {
        if lanes == 0 {
            return Err(PartitionError::ZeroLanes);
        }
        Ok(Self { lanes })
    }

    /// Number of lanes.
    pub const fn lane_count(&self) -> u32 {
        self.lanes
    }

    /// Assign a lane to a raw canonical key.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::MalformedKey`] if the key is blank.
    pub fn assign_lane(&self, key: &str) -> Result<LaneId, PartitionError> {
        let trimmed = key.trim();
        if trimmed.is_empty() || trimmed.len() != key.len() {
            return Err(PartitionError::MalformedKey {
                key: key.to_owned(),
            });
        }
        Ok(self.lane_for_hash(hash_partition_key(key)))
    }

    /// Assign a lane to an account.
    pub fn lane_for(&self, account_id: AccountId) -> LaneId {
        self.lane_for_hash(hash_partition_key(account_id.canonical()))
    }

    /// Assign a lane to an event by its account key.
    pub fn lane_for_event(&self, event: &AccountEvent) -> LaneId {
        self.lane_for(event.account_id())
    }

    fn lane_for_hash(&self, hash: u64) -> LaneId {
        let lane = hash.wrapping_rem(u64::from(self.lanes));
        // `lane < self.lanes`, which is a u32.
        LaneId(u32::try_from(lane).unwrap_or(0))
    }
}
