//! Seeded synthetic load for the replay projection engine.
//!
//! A [`LoadGenerator`] simulates a number of independent publishers. Each
//! publisher owns a fixed set of account slots and emits a fixed number of
//! events:
//!
//! - an empty slot produces `Created` with a fresh account id;
//! - an occupied slot produces `Credited` (50%), `Debited` (30%) or
//!   `Cancelled` (20%, which empties the slot).
//!
//! Publishers are interleaved round-robin. Every random choice, including
//! account ids, comes from one seeded [`SmallRng`], so a seed fully
//! determines the stream.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use replay_types::{AccountEvent, AccountId, round_money};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;

/// Invalid generator configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    /// A count that must be positive is zero.
    #[error("{field} must be at least 1")]
    Zero {
        /// The configuration field.
        field: &'static str,
    },
}

/// Shape of the generated load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoaderConfig {
    /// Number of independent publishers.
    #[serde(default = "default_publishers")]
    pub publishers: usize,

    /// Account slots per publisher.
    #[serde(default = "default_ids_per_publisher")]
    pub ids_per_publisher: usize,

    /// Events emitted by each publisher.
    #[serde(default = "default_events_per_publisher")]
    pub events_per_publisher: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            publishers: default_publishers(),
            ids_per_publisher: default_ids_per_publisher(),
            events_per_publisher: default_events_per_publisher(),
        }
    }
}

impl LoaderConfig {
    /// Total number of events the generator will emit.
    pub const fn total_events(&self) -> usize {
        self.publishers.saturating_mul(self.events_per_publisher)
    }
}

const fn default_publishers() -> usize {
    16
}

const fn default_ids_per_publisher() -> usize {
    5000
}

const fn default_events_per_publisher() -> usize {
    125_000
}

/// Counts of emitted events per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// `Created` events.
    pub created: u64,
    /// `Credited` events.
    pub credited: u64,
    /// `Debited` events.
    pub debited: u64,
    /// `Cancelled` events.
    pub cancelled: u64,
}

impl LoadSummary {
    /// All emitted events.
    pub const fn total(&self) -> u64 {
        self.created
            .saturating_add(self.credited)
            .saturating_add(self.debited)
            .saturating_add(self.cancelled)
    }

    fn record(&mut self, event: &AccountEvent) {
        let counter = match event {
            AccountEvent::Created { .. } => &mut self.created,
            AccountEvent::Credited { .. } => &mut self.credited,
            AccountEvent::Debited { .. } => &mut self.debited,
            AccountEvent::Cancelled { .. } => &mut self.cancelled,
        };
        *counter = counter.saturating_add(1);
    }
}

#[derive(Debug)]
struct Publisher {
    slots: Vec<Option<AccountId>>,
    remaining: usize,
}

/// Deterministic iterator over synthetic account events.
#[derive(Debug)]
pub struct LoadGenerator {
    rng: SmallRng,
    publishers: Vec<Publisher>,
    next_publisher: usize,
    summary: LoadSummary,
}

impl LoadGenerator {
    /// Create a generator for `config`, seeded with `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::Zero`] if any count is zero.
    pub fn new(config: &LoaderConfig, seed: u64) -> Result<Self, LoaderError> {
        if config.publishers == 0 {
            return Err(LoaderError::Zero { field: "publishers" });
        }
        if config.ids_per_publisher == 0 {
            return Err(LoaderError::Zero {
                field: "ids_per_publisher",
            });
        }
        let publishers = (0..config.publishers)
            .map(|_| Publisher {
                slots: vec![None; config.ids_per_publisher],
                remaining: config.events_per_publisher,
            })
            .collect();

        tracing::debug!(
            seed,
            publishers = config.publishers,
            ids_per_publisher = config.ids_per_publisher,
            events = config.total_events(),
            "Load generator ready"
        );

        Ok(Self {
            rng: SmallRng::seed_from_u64(seed),
            publishers,
            next_publisher: 0,
            summary: LoadSummary::default(),
        })
    }

    /// Counts of the events emitted so far.
    pub const fn summary(&self) -> LoadSummary {
        self.summary
    }

    fn fresh_id(rng: &mut SmallRng) -> AccountId {
        AccountId::from(uuid::Builder::from_random_bytes(rng.random()).into_uuid())
    }

    /// A positive amount with two decimal places.
    fn amount(rng: &mut SmallRng) -> Decimal {
        let raw = Decimal::from_f64(rng.random::<f64>() * 100.0).unwrap_or(Decimal::ZERO);
        let rounded = round_money(raw);
        if rounded.is_zero() {
            Decimal::new(1, 2)
        } else {
            rounded
        }
    }

    fn emit(rng: &mut SmallRng, publisher: &mut Publisher) -> Option<AccountEvent> {
        let index = rng.random_range(0..publisher.slots.len());
        let slot = publisher.slots.get_mut(index)?;
        let event = match *slot {
            None => {
                let account_id = Self::fresh_id(rng);
                *slot = Some(account_id);
                AccountEvent::Created { account_id }
            }
            Some(account_id) => match rng.random_range(0..10u8) {
                0..5 => AccountEvent::Credited {
                    account_id,
                    amount: Self::amount(rng),
                },
                5..8 => AccountEvent::Debited {
                    account_id,
                    amount: Self::amount(rng),
                },
                _ => {
                    *slot = None;
                    AccountEvent::Cancelled { account_id }
                }
            },
        };
        publisher.remaining = publisher.remaining.saturating_sub(1);
        Some(event)
    }
}

impl Iterator for LoadGenerator {
    type Item = AccountEvent;

    fn next(&mut self) -> Option<AccountEvent> {
        let count = self.publishers.len();
        for step in 0..count {
            let index = self.next_publisher.wrapping_add(step).checked_rem(count)?;
            let Some(publisher) = self.publishers.get_mut(index) else {
                continue;
            };
            if publisher.remaining == 0 {
                continue;
            }
            self.next_publisher = index.wrapping_add(1).checked_rem(count).unwrap_or(0);
            let event = Self::emit(&mut self.rng, publisher)?;
            self.summary.record(&event);
            return Some(event);
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use rust_decimal_macros::dec;

    use super::*;

    fn small() -> LoaderConfig {
        LoaderConfig {
            publishers: 3,
            ids_per_publisher: 4,
            events_per_publisher: 200,
        }
    }

    #[test]
    fn same_seed_same_stream() {
        let a: Vec<AccountEvent> = LoadGenerator::new(&small(), 7).unwrap().collect();
        let b: Vec<AccountEvent> = LoadGenerator::new(&small(), 7).unwrap().collect();
        let c: Vec<AccountEvent> = LoadGenerator::new(&small(), 8).unwrap().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn emits_exactly_the_configured_number_of_events() {
        let mut generator = LoadGenerator::new(&small(), 1).unwrap();
        let events = generator.by_ref().count();
        assert_eq!(events, small().total_events());
        assert_eq!(generator.summary().total(), 600);
        assert!(generator.next().is_none());
    }

    #[test]
    fn every_account_stream_is_well_formed() {
        let mut live: HashSet<AccountId> = HashSet::new();
        let mut retired: HashSet<AccountId> = HashSet::new();
        for event in LoadGenerator::new(&small(), 99).unwrap() {
            let id = event.account_id();
            assert!(!retired.contains(&id), "event after cancel for {id}");
            match event {
                AccountEvent::Created { .. } => assert!(live.insert(id)),
                AccountEvent::Credited { amount, .. } | AccountEvent::Debited { amount, .. } => {
                    assert!(live.contains(&id));
                    assert!(amount >= dec!(0.01) && amount <= dec!(100.00));
                    assert_eq!(amount.scale(), 2);
                }
                AccountEvent::Cancelled { .. } => {
                    assert!(live.remove(&id));
                    retired.insert(id);
                }
            }
        }
    }

    #[test]
    fn publishers_are_interleaved() {
        let config = LoaderConfig {
            publishers: 2,
            ids_per_publisher: 1,
            events_per_publisher: 2,
        };
        // With one slot each, every publisher starts with a create.
        let events: Vec<AccountEvent> = LoadGenerator::new(&config, 3).unwrap().collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events.first(), Some(AccountEvent::Created { .. })));
        assert!(matches!(events.get(1), Some(AccountEvent::Created { .. })));
    }

    #[test]
    fn mix_roughly_follows_weights() {
        let config = LoaderConfig {
            publishers: 4,
            ids_per_publisher: 50,
            events_per_publisher: 5000,
        };
        let mut generator = LoadGenerator::new(&config, 2024).unwrap();
        let mut per_kind: HashMap<&'static str, u64> = HashMap::new();
        for event in generator.by_ref() {
            *per_kind.entry(event.kind().as_str()).or_default() += 1;
        }
        let summary = generator.summary();
        let mutations = summary.credited + summary.debited + summary.cancelled;
        // 50 / 30 / 20 split among events on occupied slots.
        assert!(summary.credited * 100 / mutations >= 45);
        assert!(summary.debited * 100 / mutations >= 25);
        assert!(summary.cancelled * 100 / mutations >= 15);
        assert_eq!(per_kind.values().sum::<u64>(), summary.total());
    }

    #[test]
    fn zero_counts_are_rejected() {
        let config = LoaderConfig {
            publishers: 0,
            ..LoaderConfig::default()
        };
        assert_eq!(
            LoadGenerator::new(&config, 0).unwrap_err(),
            LoaderError::Zero { field: "publishers" }
        );
    }

    #[test]
    fn yaml_defaults_apply() {
        let config: LoaderConfig = serde_yml::from_str("publishers: 2\n").unwrap();
        assert_eq!(config.publishers, 2);
        assert_eq!(config.ids_per_publisher, 5000);
        assert_eq!(config.events_per_publisher, 125_000);
    }
}
