//! Event source contract and in-process sources.
//!
//! A source delivers [`EventEnvelope`]s in position order. Positions are
//! assigned by the log and are strictly increasing; the engine persists the
//! position of the last applied event with every batch and seeks past it on
//! restart.

use std::future::Future;

use replay_types::{AccountEvent, EventEnvelope};
use tokio::sync::mpsc;

use crate::error::SourceError;

/// An ordered stream of account events.
pub trait EventSource: Send {
    /// Position the source so the next event returned is the first one with
    /// a position of at least `position`.
    fn seek(&mut self, position: u64) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// The next event, or `None` once the stream has ended.
    ///
    /// Must be cancel safe: dropping the future before it completes must
    /// not lose an event. The coordinator races it against the batch
    /// window.
    fn next_event(
        &mut self,
    ) -> impl Future<Output = Result<Option<EventEnvelope>, SourceError>> + Send;
}

/// A replayable, append-only event log held in memory.
///
/// Positions start at 0 and increase by one per appended event.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    events: Vec<EventEnvelope>,
    cursor: usize,
}

impl InMemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from events in submission order.
    pub fn from_events(events: impl IntoIterator<Item = AccountEvent>) -> Self {
        let mut log = Self::new();
        for event in events {
            log.append(event);
        }
        log
    }

    /// Append one event and return its position.
    pub fn append(&mut self, event: AccountEvent) -> u64 {
        let position = self.events.len() as u64;
        self.events.push(EventEnvelope::new(position, event));
        position
    }

    /// Number of events in the log.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Position of the last appended event.
    pub fn last_position(&self) -> Option<u64> {
        self.events.last().map(|envelope| envelope.position)
    }
}

impl EventSource for InMemoryEventLog {
    async fn seek(&mut self, position: u64) -> Result<(), SourceError> {
        self.cursor = self
            .events
            .partition_point(|envelope| envelope.position < position);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<EventEnvelope>, SourceError> {
        let next = self.events.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor = self.cursor.saturating_add(1);
        }
        Ok(next)
    }
}

/// A live, non-replayable source fed through a bounded channel.
///
/// The stream ends once every sender is dropped. Seeking forward skips
/// events; seeking behind an already consumed position fails with
/// [`SourceError::NotReplayable`].
#[derive(Debug)]
pub struct ChannelEventSource {
    receiver: mpsc::Receiver<EventEnvelope>,
    skip_below: u64,
    consumed_up_to: u64,
}

impl ChannelEventSource {
    /// Wrap an existing receiver.
    pub const fn new(receiver: mpsc::Receiver<EventEnvelope>) -> Self {
        Self {
            receiver,
            skip_below: 0,
            consumed_up_to: 0,
        }
    }

    /// Create a source together with the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<EventEnvelope>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self::new(receiver))
    }
}

impl EventSource for ChannelEventSource {
    async fn seek(&mut self, position: u64) -> Result<(), SourceError> {
        if position < self.consumed_up_to {
            return Err(SourceError::NotReplayable {
                requested: position,
                current: self.consumed_up_to,
            });
        }
        self.skip_below = position;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<EventEnvelope>, SourceError> {
        while let Some(envelope) = self.receiver.recv().await {
            self.consumed_up_to = envelope.position.saturating_add(1);
            if envelope.position >= self.skip_below {
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }
}
