//! In-memory backend for the Zettai event-sourced storage core.
//!
//! This crate provides an in-memory implementation of the `ContextProvider`
//! and `EventStreamer` traits from `zettai-types`, useful for tests,
//! development, and single-process deployments where the log does not need
//! to outlive the process.
//!
//! The context handed to readers is a shared reference to one
//! [`InMemoryLog`]. Providers never create new storage: concurrent `try_run`
//! calls all see the same log and coordinate through its append protocol.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, instrument, warn};
use zettai_types::{
    ContextError, ContextProvider, ContextReader, EntityEvent, EntityId, EventSeq, EventStreamer,
    Outcome, ReaderPanicked, StoredEvent,
};

/// Context type for in-memory readers: a shared reference to the log.
pub type InMemoryRef<E> = Arc<InMemoryLog<E>>;

/// Reader running against the in-memory log.
pub type InMemoryEventsReader<E, T> = ContextReader<InMemoryRef<E>, T>;

/// Append-only, thread-safe list of stored events.
///
/// Reads take a consistent snapshot of the whole log in O(1) and never block
/// behind later appends once taken. Appends compute sequence numbers from the
/// log length *while holding* the write lock, so numbering and appending form
/// a single indivisible step and concurrent appends can never collide.
/// Snapshots handed out earlier are never mutated (copy-on-write).
///
/// The price of copy-on-write: an append made while any snapshot is still
/// alive clones the whole vector first, so under concurrent reads each append
/// costs O(n). Natural-key lookups are likewise a linear scan of the log. Both
/// are fine for a test double and for small single-process deployments.
pub struct InMemoryLog<E> {
    events: RwLock<Arc<Vec<StoredEvent<E>>>>,
}

impl<E: Clone> InMemoryLog<E> {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current contents of the log. Later appends are not reflected.
    pub fn snapshot(&self) -> Arc<Vec<StoredEvent<E>>> {
        Arc::clone(&self.events.read())
    }

    /// Number of events stored so far.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the envelopes produced by `build` as one atomic step.
    ///
    /// `build` receives the log length observed under the write lock and must
    /// number its envelopes from there. Returns the appended envelopes.
    pub fn append_with<F>(&self, build: F) -> Vec<StoredEvent<E>>
    where
        F: FnOnce(usize) -> Vec<StoredEvent<E>>,
    {
        let mut current = self.events.write();
        let appended = build(current.len());

        if !appended.is_empty() {
            Arc::make_mut(&mut *current).extend(appended.iter().cloned());
        }

        appended
    }
}

impl<E: Clone> Default for InMemoryLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider whose context is the shared in-memory log.
///
/// Cloning the provider shares the same log.
pub struct InMemoryEventsProvider<E> {
    events: InMemoryRef<E>,
}

impl<E: Clone> InMemoryEventsProvider<E> {
    /// Create a provider over a new, empty log.
    pub fn new() -> Self {
        Self::with_log(Arc::new(InMemoryLog::new()))
    }

    /// Create a provider over an existing log.
    pub fn with_log(events: InMemoryRef<E>) -> Self {
        Self { events }
    }

    /// The shared log this provider hands to readers.
    pub fn log(&self) -> &InMemoryRef<E> {
        &self.events
    }
}

impl<E: Clone> Default for InMemoryEventsProvider<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for InMemoryEventsProvider<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<E> ContextProvider<InMemoryRef<E>> for InMemoryEventsProvider<E>
where
    E: Clone + Send + Sync + 'static,
{
    #[instrument(name = "memory.try_run", skip_all)]
    async fn try_run<T>(&self, reader: InMemoryEventsReader<E, T>) -> Outcome<T>
    where
        T: Send + 'static,
    {
        let mut events = Arc::clone(&self.events);

        let result = AssertUnwindSafe(async move { reader.run_with(&mut events).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => {
                warn!(error = %fault, "[memory.try_run] reader failed");
                Err(ContextError::in_memory(fault))
            }
            Err(payload) => {
                let fault = ReaderPanicked::from_payload(payload);
                error!(error = %fault, "[memory.try_run] reader panicked");
                Err(ContextError::in_memory(Box::new(fault)))
            }
        }
    }
}

/// [`EventStreamer`] over the in-memory log.
pub struct EventStreamerInMemory<E> {
    _event: PhantomData<fn() -> E>,
}

impl<E> EventStreamerInMemory<E> {
    /// Create a streamer. It holds no state; the log lives in the context.
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E> Default for EventStreamerInMemory<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventStreamerInMemory<E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<E: EntityEvent> EventStreamer<InMemoryRef<E>, E> for EventStreamerInMemory<E> {
    fn store(&self, new_events: Vec<E>) -> InMemoryEventsReader<E, Vec<StoredEvent<E>>> {
        ContextReader::from_fn(move |log: &mut InMemoryRef<E>| {
            let stored = log.append_with(|log_len| to_stored_events(new_events, log_len));

            debug!(
                count = stored.len(),
                first_seq = ?stored.first().map(|s| s.event_seq),
                "[memory.store] appended events"
            );

            Ok(stored)
        })
    }

    fn fetch_by_entity(&self, id: EntityId) -> InMemoryEventsReader<E, Vec<E>> {
        ContextReader::from_fn(move |log: &mut InMemoryRef<E>| {
            Ok(log
                .snapshot()
                .iter()
                .filter(|stored| stored.event.entity_id() == id)
                .map(|stored| stored.event.clone())
                .collect())
        })
    }

    fn fetch_after(&self, cursor: EventSeq) -> InMemoryEventsReader<E, Vec<StoredEvent<E>>> {
        ContextReader::from_fn(move |log: &mut InMemoryRef<E>| {
            Ok(log
                .snapshot()
                .iter()
                .skip_while(|stored| stored.event_seq <= cursor)
                .cloned()
                .collect())
        })
    }

    fn retrieve_id_from_natural_key(
        &self,
        key: &E::NaturalKey,
    ) -> InMemoryEventsReader<E, Option<EntityId>> {
        let key = key.clone();

        ContextReader::from_fn(move |log: &mut InMemoryRef<E>| {
            Ok(log
                .snapshot()
                .iter()
                .map(|stored| &stored.event)
                .find(|event| event.natural_key().as_ref() == Some(&key))
                .map(EntityEvent::entity_id))
        })
    }
}

fn to_stored_events<E>(new_events: Vec<E>, log_len: usize) -> Vec<StoredEvent<E>> {
    new_events
        .into_iter()
        .enumerate()
        .map(|(offset, event)| {
            StoredEvent::new(EventSeq::for_append(log_len, offset), Utc::now(), event)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tracing_test::traced_test;
    use zettai_types::Fault;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestEvent {
        Created { id: EntityId, key: String },
        Noted { id: EntityId, note: String },
    }

    impl EntityEvent for TestEvent {
        type NaturalKey = String;

        fn entity_id(&self) -> EntityId {
            match self {
                Self::Created { id, .. } | Self::Noted { id, .. } => *id,
            }
        }

        fn natural_key(&self) -> Option<String> {
            match self {
                Self::Created { key, .. } => Some(key.clone()),
                Self::Noted { .. } => None,
            }
        }

        fn event_type(&self) -> &'static str {
            match self {
                Self::Created { .. } => "Created",
                Self::Noted { .. } => "Noted",
            }
        }
    }

    fn created(id: EntityId, key: &str) -> TestEvent {
        TestEvent::Created {
            id,
            key: key.to_string(),
        }
    }

    fn noted(id: EntityId, note: &str) -> TestEvent {
        TestEvent::Noted {
            id,
            note: note.to_string(),
        }
    }

    fn backend() -> (
        InMemoryEventsProvider<TestEvent>,
        EventStreamerInMemory<TestEvent>,
    ) {
        (InMemoryEventsProvider::new(), EventStreamerInMemory::new())
    }

    fn seqs(stored: &[StoredEvent<TestEvent>]) -> Vec<i64> {
        stored.iter().map(|s| s.event_seq.into_inner()).collect()
    }

    #[test]
    fn new_log_is_empty() {
        let log: InMemoryLog<TestEvent> = InMemoryLog::new();

        assert!(log.is_empty());
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn cloned_provider_shares_the_log() {
        let provider: InMemoryEventsProvider<TestEvent> = InMemoryEventsProvider::new();
        let clone = provider.clone();

        assert!(Arc::ptr_eq(provider.log(), clone.log()));
    }

    #[tokio::test]
    async fn store_numbers_batch_from_current_length() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();

        let first = provider
            .try_run(streamer.store(vec![created(id, "k"), noted(id, "a")]))
            .await
            .expect("first store");
        let second = provider
            .try_run(streamer.store(vec![noted(id, "b"), noted(id, "c"), noted(id, "d")]))
            .await
            .expect("second store");

        assert_eq!((seqs(&first), seqs(&second)), (vec![0, 1], vec![2, 3, 4]));
    }

    #[tokio::test]
    async fn store_preserves_input_order() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();
        let batch = vec![noted(id, "x"), noted(id, "y"), noted(id, "z")];

        let stored = provider
            .try_run(streamer.store(batch.clone()))
            .await
            .expect("store");

        let payloads: Vec<TestEvent> = stored.into_iter().map(StoredEvent::into_event).collect();
        assert_eq!(payloads, batch);
    }

    #[tokio::test]
    async fn storing_an_empty_batch_changes_nothing() {
        let (provider, streamer) = backend();

        let stored = provider
            .try_run(streamer.store(Vec::new()))
            .await
            .expect("empty store");

        assert!(stored.is_empty());
        assert!(provider.log().is_empty());
    }

    #[tokio::test]
    async fn fetch_by_entity_returns_only_that_entity_in_order() {
        let (provider, streamer) = backend();
        let a = EntityId::generate();
        let b = EntityId::generate();

        let _ = provider
            .try_run(streamer.store(vec![created(b, "b"), created(a, "a"), noted(b, "b1")]))
            .await
            .expect("store");
        let _ = provider
            .try_run(streamer.store(vec![noted(a, "a1"), noted(b, "b2"), noted(a, "a2")]))
            .await
            .expect("store");

        let events = provider
            .try_run(streamer.fetch_by_entity(a))
            .await
            .expect("fetch");

        assert_eq!(events, vec![created(a, "a"), noted(a, "a1"), noted(a, "a2")]);
    }

    #[tokio::test]
    async fn fetch_by_unknown_entity_is_empty() {
        let (provider, streamer) = backend();

        let events = provider
            .try_run(streamer.fetch_by_entity(EntityId::generate()))
            .await
            .expect("fetch");

        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn fetch_after_respects_cursor_bounds() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();
        let stored = provider
            .try_run(streamer.store(vec![created(id, "k"), noted(id, "1"), noted(id, "2")]))
            .await
            .expect("store");
        let last = stored.last().map(|s| s.event_seq).expect("non-empty batch");

        let all = provider
            .try_run(streamer.fetch_after(EventSeq::before_first()))
            .await
            .expect("fetch all");
        let tail = provider
            .try_run(streamer.fetch_after(EventSeq::first()))
            .await
            .expect("fetch tail");
        let none = provider
            .try_run(streamer.fetch_after(last))
            .await
            .expect("fetch none");

        assert_eq!(all, stored);
        assert_eq!(seqs(&tail), vec![1, 2]);
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn natural_key_resolves_once_created() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();
        let key = "alice/groceries".to_string();

        let before = provider
            .try_run(streamer.retrieve_id_from_natural_key(&key))
            .await
            .expect("lookup before");
        let _ = provider
            .try_run(streamer.store(vec![created(id, &key)]))
            .await
            .expect("store");
        let after = provider
            .try_run(streamer.retrieve_id_from_natural_key(&key))
            .await
            .expect("lookup after");
        let again = provider
            .try_run(streamer.retrieve_id_from_natural_key(&key))
            .await
            .expect("lookup again");

        assert_eq!((before, after, again), (None, Some(id), Some(id)));
    }

    #[tokio::test]
    async fn natural_key_resolution_prefers_earliest_creation() {
        let (provider, streamer) = backend();
        let original = EntityId::generate();
        let recreated = EntityId::generate();

        let _ = provider
            .try_run(streamer.store(vec![created(original, "dup"), created(recreated, "dup")]))
            .await
            .expect("store");

        let found = provider
            .try_run(streamer.retrieve_id_from_natural_key(&"dup".to_string()))
            .await
            .expect("lookup");

        assert_eq!(found, Some(original));
    }

    #[tokio::test]
    async fn non_creation_events_do_not_match_natural_keys() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();

        let _ = provider
            .try_run(streamer.store(vec![noted(id, "groceries")]))
            .await
            .expect("store");

        let found = provider
            .try_run(streamer.retrieve_id_from_natural_key(&"groceries".to_string()))
            .await
            .expect("lookup");

        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn snapshot_does_not_observe_later_appends() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();
        let _ = provider
            .try_run(streamer.store(vec![created(id, "k")]))
            .await
            .expect("store");

        let snapshot = provider.log().snapshot();
        let _ = provider
            .try_run(streamer.store(vec![noted(id, "later")]))
            .await
            .expect("store");

        assert_eq!((snapshot.len(), provider.log().len()), (1, 2));
    }

    #[test]
    fn append_while_snapshot_is_held_copies_the_log() {
        let log = InMemoryLog::<TestEvent>::new();
        let id = EntityId::generate();
        let _ = log.append_with(|len| to_stored_events(vec![created(id, "k")], len));

        let held = log.snapshot();
        let _ = log.append_with(|len| to_stored_events(vec![noted(id, "later")], len));
        let current = log.snapshot();

        assert!(!Arc::ptr_eq(&held, &current));
        assert_eq!(held.len(), 1);
        assert_eq!(current[..1], held[..]);
        assert_eq!(current[1].event_seq, EventSeq::new(1));
    }

    #[tokio::test]
    #[traced_test]
    async fn reader_fault_becomes_in_memory_error() {
        let (provider, _streamer) = backend();

        let result = provider
            .try_run(InMemoryEventsReader::<TestEvent, ()>::fail("lost the plot"))
            .await;

        let error = result.expect_err("fault should surface as failure");
        assert!(matches!(error, ContextError::InMemoryOperation { .. }));
        assert_eq!(error.message(), "Operation failed because lost the plot");
        assert!(logs_contain("[memory.try_run] reader failed"));
    }

    #[tokio::test]
    async fn reader_panic_is_contained() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();

        let panicking = ContextReader::from_fn(|_log: &mut InMemoryRef<TestEvent>| -> Result<(), Fault> {
            panic!("reader exploded")
        });
        let error = provider
            .try_run(panicking)
            .await
            .expect_err("panic should surface as failure");

        let stored = provider
            .try_run(streamer.store(vec![created(id, "still-works")]))
            .await
            .expect("provider remains usable");

        assert_eq!(error.message(), "Operation failed because reader panicked: reader exploded");
        assert_eq!(seqs(&stored), vec![0]);
    }

    #[tokio::test]
    async fn composed_readers_see_their_own_writes() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();
        let fetcher = streamer.clone();

        let events = provider
            .try_run(
                streamer
                    .store(vec![created(id, "k"), noted(id, "milk")])
                    .and_then(move |_| fetcher.fetch_by_entity(id)),
            )
            .await
            .expect("composed reader");

        assert_eq!(events, vec![created(id, "k"), noted(id, "milk")]);
    }

    #[tokio::test]
    async fn faults_after_append_do_not_undo_in_memory_writes() {
        let (provider, streamer) = backend();
        let id = EntityId::generate();

        let result = provider
            .try_run(
                streamer
                    .store(vec![created(id, "k")])
                    .and_then(|_| ContextReader::<InMemoryRef<TestEvent>, ()>::fail("late fault")),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(provider.log().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_never_share_sequence_numbers() {
        const WRITERS: usize = 8;
        const BATCHES: usize = 25;
        const BATCH_LEN: usize = 3;

        let provider = InMemoryEventsProvider::<TestEvent>::new();
        let mut handles = Vec::new();

        for _ in 0..WRITERS {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                let streamer = EventStreamerInMemory::<TestEvent>::new();
                let id = EntityId::generate();
                let mut assigned = Vec::new();
                for batch in 0..BATCHES {
                    let events = (0..BATCH_LEN)
                        .map(|n| noted(id, &format!("{batch}-{n}")))
                        .collect();
                    let stored = provider
                        .try_run(streamer.store(events))
                        .await
                        .expect("concurrent store");
                    assert!(stored.windows(2).all(|w| w[1].event_seq == w[0].event_seq.next()));
                    assigned.extend(stored.into_iter().map(|s| s.event_seq.into_inner()));
                }
                assigned
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.expect("writer task"));
        }

        let total = WRITERS * BATCHES * BATCH_LEN;
        let unique: HashSet<i64> = all.iter().copied().collect();
        let expected: HashSet<i64> = (0..total as i64).collect();

        assert_eq!(all.len(), total);
        assert_eq!(unique, expected);
        assert_eq!(seqs(&provider.log().snapshot()), (0..total as i64).collect::<Vec<_>>());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn batches_are_contiguous_with_log_length(batch_sizes in prop::collection::vec(0usize..6, 1..12)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .expect("runtime");

                rt.block_on(async {
                    let (provider, streamer) = backend();
                    let id = EntityId::generate();

                    for size in batch_sizes {
                        let before = provider.log().len() as i64;
                        let events = (0..size).map(|n| noted(id, &n.to_string())).collect();
                        let stored = provider
                            .try_run(streamer.store(events))
                            .await
                            .expect("store");
                        let expected: Vec<i64> = (before..before + size as i64).collect();
                        prop_assert_eq!(seqs(&stored), expected);
                    }
                    Ok(())
                })?;
            }
        }
    }
}
