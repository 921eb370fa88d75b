#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Shared event bus for the consumer pipeline.
///
/// Every component gets a cloned `EventBus` and publishes directly.
/// `publish()` is a sync call; with no subscribers events are silently
/// dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Accepts any sub-enum value via `Into<Event>`.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Subscribe to all future events. Slow subscribers see
    /// `RecvError::Lagged` instead of blocking producers.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
