//! Behavioral contract every `EventStreamer` backend must satisfy.
//!
//! Each `test_*` function exercises one guarantee against a
//! [`ContractBackend`]. Backends plug into the whole suite at once through
//! [`streamer_contract_tests!`](crate::streamer_contract_tests!).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zettai_types::{
    ContextError, ContextProvider, ContextReader, EntityEvent, EntityId, EventSeq, EventStreamer,
    StoredEvent,
};

#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn provider_error(scenario: &'static str, operation: &'static str, error: ContextError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

pub type ContractTestResult = Result<(), ContractTestFailure>;

/// Event type used by every contract scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContractTestEvent {
    Opened { id: EntityId, key: String },
    Noted { id: EntityId, note: String },
}

impl ContractTestEvent {
    pub fn opened(id: EntityId, key: impl Into<String>) -> Self {
        Self::Opened {
            id,
            key: key.into(),
        }
    }

    pub fn noted(id: EntityId, note: impl Into<String>) -> Self {
        Self::Noted {
            id,
            note: note.into(),
        }
    }
}

impl EntityEvent for ContractTestEvent {
    type NaturalKey = String;

    fn entity_id(&self) -> EntityId {
        match self {
            Self::Opened { id, .. } | Self::Noted { id, .. } => *id,
        }
    }

    fn natural_key(&self) -> Option<String> {
        match self {
            Self::Opened { key, .. } => Some(key.clone()),
            Self::Noted { .. } => None,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "Opened",
            Self::Noted { .. } => "Noted",
        }
    }
}

/// A provider/streamer pair under test, plus whatever must stay alive while
/// the scenario runs (a database container, for instance).
pub struct ContractBackend<P, S, G = ()> {
    pub provider: P,
    pub streamer: S,
    _guard: G,
}

impl<P, S> ContractBackend<P, S> {
    pub fn new(provider: P, streamer: S) -> Self {
        Self {
            provider,
            streamer,
            _guard: (),
        }
    }

    /// Keep `guard` alive for as long as the backend is used.
    pub fn keep_alive<G>(self, guard: G) -> ContractBackend<P, S, G> {
        ContractBackend {
            provider: self.provider,
            streamer: self.streamer,
            _guard: guard,
        }
    }
}

fn contract_key(scenario: &'static str, label: &str) -> String {
    // Unique per run so scenarios can share a database.
    format!("contract::{scenario}::{label}::{}", Uuid::now_v7())
}

fn seq_values(stored: &[StoredEvent<ContractTestEvent>]) -> Vec<i64> {
    stored.iter().map(|s| s.event_seq.into_inner()).collect()
}

async fn log_length<Ctx, P, S, G>(
    scenario: &'static str,
    backend: &ContractBackend<P, S, G>,
) -> Result<i64, ContractTestFailure>
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    let all = fetch_after(scenario, backend, EventSeq::before_first()).await?;
    Ok(all.len() as i64)
}

async fn fetch_after<Ctx, P, S, G>(
    scenario: &'static str,
    backend: &ContractBackend<P, S, G>,
    cursor: EventSeq,
) -> Result<Vec<StoredEvent<ContractTestEvent>>, ContractTestFailure>
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    backend
        .provider
        .try_run(backend.streamer.fetch_after(cursor))
        .await
        .map_err(|error| ContractTestFailure::provider_error(scenario, "fetch_after", error))
}

async fn resolve<Ctx, P, S, G>(
    scenario: &'static str,
    backend: &ContractBackend<P, S, G>,
    key: &String,
) -> Result<Option<EntityId>, ContractTestFailure>
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    backend
        .provider
        .try_run(backend.streamer.retrieve_id_from_natural_key(key))
        .await
        .map_err(|error| {
            ContractTestFailure::provider_error(scenario, "retrieve_id_from_natural_key", error)
        })
}

async fn store<Ctx, P, S, G>(
    scenario: &'static str,
    backend: &ContractBackend<P, S, G>,
    events: Vec<ContractTestEvent>,
) -> Result<Vec<StoredEvent<ContractTestEvent>>, ContractTestFailure>
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    backend
        .provider
        .try_run(backend.streamer.store(events))
        .await
        .map_err(|error| ContractTestFailure::provider_error(scenario, "store", error))
}

fn expect_eq<T: PartialEq + fmt::Debug>(
    scenario: &'static str,
    what: &str,
    actual: T,
    expected: T,
) -> ContractTestResult {
    if actual == expected {
        Ok(())
    } else {
        Err(ContractTestFailure::assertion(
            scenario,
            format!("{what}: expected {expected:?}, got {actual:?}"),
        ))
    }
}

pub async fn test_store_assigns_contiguous_sequence<Ctx, P, S, G>(
    backend: &ContractBackend<P, S, G>,
) -> ContractTestResult
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    const SCENARIO: &str = "store_assigns_contiguous_sequence";

    let id = EntityId::generate();
    let before = log_length(SCENARIO, backend).await?;

    let first = store(
        SCENARIO,
        backend,
        vec![
            ContractTestEvent::opened(id, contract_key(SCENARIO, "list")),
            ContractTestEvent::noted(id, "one"),
            ContractTestEvent::noted(id, "two"),
        ],
    )
    .await?;
    let second = store(
        SCENARIO,
        backend,
        vec![
            ContractTestEvent::noted(id, "three"),
            ContractTestEvent::noted(id, "four"),
        ],
    )
    .await?;

    expect_eq(
        SCENARIO,
        "first batch sequence numbers",
        seq_values(&first),
        (before..before + 3).collect(),
    )?;
    expect_eq(
        SCENARIO,
        "second batch sequence numbers",
        seq_values(&second),
        (before + 3..before + 5).collect(),
    )?;

    let payloads: Vec<String> = second
        .iter()
        .filter_map(|stored| match &stored.event {
            ContractTestEvent::Noted { note, .. } => Some(note.clone()),
            ContractTestEvent::Opened { .. } => None,
        })
        .collect();
    expect_eq(
        SCENARIO,
        "second batch payload order",
        payloads,
        vec!["three".to_string(), "four".to_string()],
    )
}

pub async fn test_concurrent_stores_never_collide<Ctx, P, S, G>(
    backend: &ContractBackend<P, S, G>,
) -> ContractTestResult
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx> + Clone + Send + Sync + 'static,
    S: EventStreamer<Ctx, ContractTestEvent> + Clone + Send + Sync + 'static,
{
    const SCENARIO: &str = "concurrent_stores_never_collide";
    const WRITERS: usize = 4;
    const BATCHES: usize = 5;
    const BATCH_LEN: usize = 2;

    let before = log_length(SCENARIO, backend).await?;
    let shared = Arc::new((backend.provider.clone(), backend.streamer.clone()));

    let mut handles = Vec::with_capacity(WRITERS);
    for writer in 0..WRITERS {
        let shared = Arc::clone(&shared);
        handles.push(tokio::spawn(async move {
            let (provider, streamer) = &*shared;
            let id = EntityId::generate();
            let mut assigned = Vec::new();
            for batch in 0..BATCHES {
                let events = (0..BATCH_LEN)
                    .map(|n| ContractTestEvent::noted(id, format!("{writer}-{batch}-{n}")))
                    .collect();
                let stored = provider.try_run(streamer.store(events)).await?;
                assigned.extend(seq_values(&stored));
            }
            Ok::<_, ContextError>(assigned)
        }));
    }

    let mut assigned = Vec::new();
    for handle in handles {
        let seqs = handle
            .await
            .map_err(|error| ContractTestFailure::assertion(SCENARIO, format!("writer task failed: {error}")))?
            .map_err(|error| ContractTestFailure::provider_error(SCENARIO, "store", error))?;
        assigned.extend(seqs);
    }

    let total = (WRITERS * BATCHES * BATCH_LEN) as i64;
    let unique: BTreeSet<i64> = assigned.iter().copied().collect();

    expect_eq(SCENARIO, "assigned count", assigned.len() as i64, total)?;
    expect_eq(
        SCENARIO,
        "assigned sequence numbers",
        unique,
        (before..before + total).collect(),
    )
}

pub async fn test_fetch_by_entity_isolation<Ctx, P, S, G>(
    backend: &ContractBackend<P, S, G>,
) -> ContractTestResult
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    const SCENARIO: &str = "fetch_by_entity_isolation";

    let first = EntityId::generate();
    let second = EntityId::generate();
    let first_events = vec![
        ContractTestEvent::opened(first, contract_key(SCENARIO, "first")),
        ContractTestEvent::noted(first, "milk"),
        ContractTestEvent::noted(first, "eggs"),
    ];

    let _ = store(
        SCENARIO,
        backend,
        vec![
            ContractTestEvent::opened(second, contract_key(SCENARIO, "second")),
            first_events[0].clone(),
        ],
    )
    .await?;
    let _ = store(
        SCENARIO,
        backend,
        vec![
            ContractTestEvent::noted(second, "bread"),
            first_events[1].clone(),
        ],
    )
    .await?;
    let _ = store(SCENARIO, backend, vec![first_events[2].clone()]).await?;

    let fetched = backend
        .provider
        .try_run(backend.streamer.fetch_by_entity(first))
        .await
        .map_err(|error| ContractTestFailure::provider_error(SCENARIO, "fetch_by_entity", error))?;
    let unknown = backend
        .provider
        .try_run(backend.streamer.fetch_by_entity(EntityId::generate()))
        .await
        .map_err(|error| ContractTestFailure::provider_error(SCENARIO, "fetch_by_entity", error))?;

    expect_eq(SCENARIO, "events of first entity", fetched, first_events)?;
    expect_eq(SCENARIO, "events of unknown entity", unknown, Vec::new())
}

pub async fn test_fetch_after_cursor<Ctx, P, S, G>(
    backend: &ContractBackend<P, S, G>,
) -> ContractTestResult
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    const SCENARIO: &str = "fetch_after_cursor";

    let id = EntityId::generate();
    let stored = store(
        SCENARIO,
        backend,
        vec![
            ContractTestEvent::opened(id, contract_key(SCENARIO, "list")),
            ContractTestEvent::noted(id, "a"),
            ContractTestEvent::noted(id, "b"),
        ],
    )
    .await?;

    let (Some(first), Some(last)) = (stored.first(), stored.last()) else {
        return Err(ContractTestFailure::assertion(SCENARIO, "store returned no envelopes"));
    };

    let everything = fetch_after(SCENARIO, backend, EventSeq::before_first()).await?;
    let after_first = fetch_after(SCENARIO, backend, first.event_seq).await?;
    let after_last = fetch_after(SCENARIO, backend, last.event_seq).await?;

    let ordered = everything
        .windows(2)
        .all(|pair| pair[0].event_seq < pair[1].event_seq);
    expect_eq(SCENARIO, "full replay is ordered", ordered, true)?;
    expect_eq(
        SCENARIO,
        "full replay ends with the batch",
        everything[everything.len().saturating_sub(3)..].to_vec(),
        stored.clone(),
    )?;
    expect_eq(
        SCENARIO,
        "events after first",
        seq_values(&after_first),
        seq_values(&stored[1..]),
    )?;
    expect_eq(SCENARIO, "events after last", after_last.len(), 0)
}

pub async fn test_natural_key_resolution<Ctx, P, S, G>(
    backend: &ContractBackend<P, S, G>,
) -> ContractTestResult
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    const SCENARIO: &str = "natural_key_resolution";

    let id = EntityId::generate();
    let later = EntityId::generate();
    let key = contract_key(SCENARIO, "groceries");

    let before = resolve(SCENARIO, backend, &key).await?;
    expect_eq(SCENARIO, "lookup before creation", before, None)?;

    let _ = store(
        SCENARIO,
        backend,
        vec![
            ContractTestEvent::noted(later, key.clone()),
            ContractTestEvent::opened(id, key.clone()),
        ],
    )
    .await?;
    let _ = store(SCENARIO, backend, vec![ContractTestEvent::opened(later, key.clone())]).await?;

    for attempt in 0..2 {
        let found = resolve(SCENARIO, backend, &key).await?;
        expect_eq(
            SCENARIO,
            if attempt == 0 { "lookup after creation" } else { "repeated lookup" },
            found,
            Some(id),
        )?;
    }

    Ok(())
}

pub async fn test_composed_readers_share_context<Ctx, P, S, G>(
    backend: &ContractBackend<P, S, G>,
) -> ContractTestResult
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent> + Clone + Send + 'static,
{
    const SCENARIO: &str = "composed_readers_share_context";

    let id = EntityId::generate();
    let key = contract_key(SCENARIO, "list");
    let events = vec![
        ContractTestEvent::opened(id, key.clone()),
        ContractTestEvent::noted(id, "milk"),
    ];

    let fetcher = backend.streamer.clone();
    let resolver = backend.streamer.clone();
    let reader = backend
        .streamer
        .store(events.clone())
        .and_then(move |_| resolver.retrieve_id_from_natural_key(&key))
        .and_then(move |found| match found {
            Some(found) => fetcher.fetch_by_entity(found),
            None => ContextReader::fail("natural key not visible inside the same context"),
        });

    let fetched = backend
        .provider
        .try_run(reader)
        .await
        .map_err(|error| ContractTestFailure::provider_error(SCENARIO, "composed", error))?;

    expect_eq(SCENARIO, "events seen by composed reader", fetched, events)
}

pub async fn test_reader_fault_surfaces_as_failure<Ctx, P, S, G>(
    backend: &ContractBackend<P, S, G>,
) -> ContractTestResult
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, ContractTestEvent>,
{
    const SCENARIO: &str = "reader_fault_surfaces_as_failure";

    let id = EntityId::generate();
    let reader = backend
        .streamer
        .store(vec![ContractTestEvent::opened(id, contract_key(SCENARIO, "list"))])
        .and_then(|_| ContextReader::<Ctx, ()>::fail("deliberate contract fault"));

    match backend.provider.try_run(reader).await {
        Ok(()) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "faulting reader reported success",
        )),
        Err(error) if error.to_string().contains("deliberate contract fault") => Ok(()),
        Err(error) => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("error does not mention the fault: {error}"),
        )),
    }
}

/// Generate the full contract suite for a backend.
///
/// `make_backend` is an async function returning a [`ContractBackend`]; it is
/// called once per scenario. Extra attributes (such as `#[ignore]`) are applied
/// to every generated test.
///
/// ```ignore
/// streamer_contract_tests! {
///     suite = in_memory,
///     make_backend = in_memory_backend,
/// }
/// ```
#[macro_export]
macro_rules! streamer_contract_tests {
    ($(#[$meta:meta])* suite = $suite:ident, make_backend = $make_backend:path $(,)?) => {
        mod $suite {
            use super::*;
            use $crate::contract::{
                test_composed_readers_share_context, test_concurrent_stores_never_collide,
                test_fetch_after_cursor, test_fetch_by_entity_isolation,
                test_natural_key_resolution, test_reader_fault_surfaces_as_failure,
                test_store_assigns_contiguous_sequence,
            };

            #[tokio::test(flavor = "multi_thread")]
            $(#[$meta])*
            async fn store_assigns_contiguous_sequence_contract() {
                let backend = $make_backend().await;
                test_store_assigns_contiguous_sequence(&backend)
                    .await
                    .expect("streamer contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$meta])*
            async fn concurrent_stores_never_collide_contract() {
                let backend = $make_backend().await;
                test_concurrent_stores_never_collide(&backend)
                    .await
                    .expect("streamer contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$meta])*
            async fn fetch_by_entity_isolation_contract() {
                let backend = $make_backend().await;
                test_fetch_by_entity_isolation(&backend)
                    .await
                    .expect("streamer contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$meta])*
            async fn fetch_after_cursor_contract() {
                let backend = $make_backend().await;
                test_fetch_after_cursor(&backend)
                    .await
                    .expect("streamer contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$meta])*
            async fn natural_key_resolution_contract() {
                let backend = $make_backend().await;
                test_natural_key_resolution(&backend)
                    .await
                    .expect("streamer contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$meta])*
            async fn composed_readers_share_context_contract() {
                let backend = $make_backend().await;
                test_composed_readers_share_context(&backend)
                    .await
                    .expect("streamer contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[$meta])*
            async fn reader_fault_surfaces_as_failure_contract() {
                let backend = $make_backend().await;
                test_reader_fault_surfaces_as_failure(&backend)
                    .await
                    .expect("streamer contract failed");
            }
        }
    };
}
