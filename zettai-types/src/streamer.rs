use crate::context::ContextReader;
use crate::event::{EntityEvent, EntityId, EventSeq, StoredEvent};

/// Domain-facing port over an append-only event log.
///
/// Every operation returns a [`ContextReader`] to be run by the
/// [`ContextProvider`](crate::ContextProvider) of the matching backend. The
/// streamer never talks to a provider itself; implementations differ only in
/// how they touch `Ctx`.
///
/// None of the operations define domain errors. Backend failures
/// (serialization, disconnects, constraint violations) surface only through
/// the enclosing provider's `try_run`.
///
/// Implementations include:
/// - `zettai-memory`: `EventStreamerInMemory`
/// - `zettai-postgres`: `EventStreamerPostgres`
pub trait EventStreamer<Ctx, E: EntityEvent> {
    /// Append `new_events` as one indivisible unit.
    ///
    /// Each event receives the next sequence number, starting from the log's
    /// current length and preserving input order. Concurrent calls can never
    /// be assigned overlapping ranges. Returns the stored envelopes so callers
    /// can advance their cursors.
    fn store(&self, new_events: Vec<E>) -> ContextReader<Ctx, Vec<StoredEvent<E>>>;

    /// All events of `id`, in sequence order, without their envelopes.
    ///
    /// Unknown entities yield an empty vector.
    fn fetch_by_entity(&self, id: EntityId) -> ContextReader<Ctx, Vec<E>>;

    /// All envelopes with a sequence number strictly greater than `cursor`,
    /// in order. Calling it again with the highest sequence seen so far
    /// delivers each new event exactly once.
    fn fetch_after(&self, cursor: EventSeq) -> ContextReader<Ctx, Vec<StoredEvent<E>>>;

    /// Resolve a natural key to the id of the entity whose creation event
    /// carries it, or `None` if no such event has been stored yet.
    ///
    /// When several creation events match, the earliest one wins.
    fn retrieve_id_from_natural_key(
        &self,
        key: &E::NaturalKey,
    ) -> ContextReader<Ctx, Option<EntityId>>;
}
