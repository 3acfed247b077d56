use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of an aggregate instance.
///
/// Assigned once, when the entity's creation event is produced, and never
/// changed afterwards.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Position of an event in the log.
///
/// Sequence numbers form a total, gapless order over every event ever
/// appended: the first event gets `0`, each later one the previous value plus
/// one. This is the only ordering authority used for replay.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    Serialize,
    Deserialize
))]
pub struct EventSeq(i64);

impl EventSeq {
    /// Cursor positioned before the first event; `fetch_after` from here
    /// replays the whole log.
    pub fn before_first() -> Self {
        Self::new(-1)
    }

    /// Sequence number of the first event in a log.
    pub fn first() -> Self {
        Self::new(0)
    }

    pub fn next(self) -> Self {
        Self::new(self.into_inner() + 1)
    }

    /// Sequence number for the `offset`-th event of a batch appended to a log
    /// currently holding `log_len` events.
    pub fn for_append(log_len: usize, offset: usize) -> Self {
        Self::new((log_len + offset) as i64)
    }
}

/// Persisted envelope around an event payload.
///
/// Immutable once created. The log owns stored events exclusively; readers
/// hand out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent<E> {
    pub event_seq: EventSeq,
    pub recorded_at: DateTime<Utc>,
    pub event: E,
}

impl<E> StoredEvent<E> {
    pub fn new(event_seq: EventSeq, recorded_at: DateTime<Utc>, event: E) -> Self {
        Self {
            event_seq,
            recorded_at,
            event,
        }
    }

    pub fn into_event(self) -> E {
        self.event
    }
}

/// Contract every event payload stored in a log must satisfy.
///
/// Events belong to exactly one entity. Creation events additionally expose
/// the business-level natural key that identifies the entity, which is what
/// `retrieve_id_from_natural_key` scans for.
///
/// # Example
///
/// ```ignore
/// impl EntityEvent for ToDoListEvent {
///     type NaturalKey = UserListName;
///
///     fn entity_id(&self) -> EntityId { self.id() }
///
///     fn natural_key(&self) -> Option<UserListName> {
///         match self {
///             ToDoListEvent::ListCreated { owner, name, .. } => {
///                 Some(UserListName::new(owner.clone(), name.clone()))
///             }
///             _ => None,
///         }
///     }
///
///     fn event_type(&self) -> &'static str { ... }
/// }
/// ```
pub trait EntityEvent: Clone + Send + Sync + 'static {
    /// Business-meaningful key used to discover an entity's id.
    type NaturalKey: PartialEq + Clone + Send + Sync + 'static;

    /// Entity this event belongs to.
    fn entity_id(&self) -> EntityId;

    /// `Some(key)` for the event that creates an entity, `None` otherwise.
    fn natural_key(&self) -> Option<Self::NaturalKey>;

    /// Stable name of the event variant, used for storage and logging.
    fn event_type(&self) -> &'static str;

    fn creates_entity(&self) -> bool {
        self.natural_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_first_precedes_first() {
        assert!(EventSeq::before_first() < EventSeq::first());
        assert_eq!(EventSeq::before_first().next(), EventSeq::first());
    }

    #[test]
    fn for_append_continues_from_log_length() {
        let seqs: Vec<i64> = (0..3)
            .map(|offset| EventSeq::for_append(5, offset).into_inner())
            .collect();

        assert_eq!(seqs, vec![5, 6, 7]);
    }

    #[test]
    fn generated_entity_ids_are_distinct() {
        assert_ne!(EntityId::generate(), EntityId::generate());
    }

    #[test]
    fn stored_event_serializes_with_envelope_fields() {
        let stored = StoredEvent::new(EventSeq::new(3), Utc::now(), "payload".to_string());

        let json = serde_json::to_value(&stored).expect("serialize stored event");

        assert_eq!(json["event_seq"], 3);
        assert_eq!(json["event"], "payload");
    }
}
