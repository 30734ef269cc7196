//! In-memory event sink.

use std::sync::Mutex;

use super::EventSink;
use crate::event::{EventKind, ViolationEvent};

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ViolationEvent>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the received events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<ViolationEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of received events of `kind`.
    #[must_use]
    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    /// Total number of received events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn send(&self, event: ViolationEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
