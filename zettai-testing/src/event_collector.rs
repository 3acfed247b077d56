//! Test utility for collecting events during projection for assertions.
//!
//! `EventCollector` implements [`Projector`] and accumulates every envelope it
//! is fed in shared storage, so test code can run [`catch_up`] and then
//! inspect exactly what was delivered and in which order.
//!
//! ```ignore
//! let collector = EventCollector::<ToDoListEvent>::new();
//! let handle = collector.clone();
//! let mut projector = collector;
//!
//! catch_up(&provider, &streamer, &mut projector, EventSeq::before_first()).await?;
//!
//! assert_eq!(handle.events().len(), 2);
//! ```
//!
//! [`catch_up`]: zettai_types::catch_up

use std::sync::Arc;

use parking_lot::Mutex;
use zettai_types::{EventSeq, Projector, StoredEvent};

/// A projector that records envelopes for later inspection.
///
/// Clones share the same storage.
#[derive(Debug)]
pub struct EventCollector<E> {
    events: Arc<Mutex<Vec<StoredEvent<E>>>>,
}

impl<E: Clone> EventCollector<E> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Payloads collected so far, in delivery order.
    pub fn events(&self) -> Vec<E> {
        self.events
            .lock()
            .iter()
            .map(|stored| stored.event.clone())
            .collect()
    }

    /// Sequence numbers collected so far, in delivery order.
    pub fn sequence_numbers(&self) -> Vec<EventSeq> {
        self.events.lock().iter().map(|stored| stored.event_seq).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone> Default for EventCollector<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventCollector<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<E: Clone> Projector for EventCollector<E> {
    type Event = E;

    fn apply(&mut self, stored: &StoredEvent<E>) {
        self.events.lock().push(stored.clone());
    }

    fn name(&self) -> &str {
        "event-collector"
    }
}
