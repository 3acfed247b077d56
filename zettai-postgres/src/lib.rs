//! PostgreSQL backend for the Zettai event-sourced storage core.
//!
//! [`TransactionProvider`] runs every reader inside its own database
//! transaction, committing on success and rolling back on any fault or panic.
//! [`EventStreamerPostgres`] implements the log operations as SQL against the
//! `zettai_events` table created by the embedded migrations.

#![forbid(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use futures::FutureExt;
use nutype::nutype;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{query, query_scalar, Pool, Postgres, Row, Transaction};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use zettai_types::{
    ContextError, ContextProvider, ContextReader, EntityEvent, EntityId, EventSeq, EventStreamer,
    Fault, Outcome, ReaderPanicked, StoredEvent,
};

/// Context handed to readers: a live, top-level transaction.
pub type PgTransaction = Transaction<'static, Postgres>;

/// Reader running inside a PostgreSQL transaction.
pub type PostgresReader<T> = ContextReader<PgTransaction, T>;

/// Key of the transaction-scoped advisory lock serializing appends.
const APPEND_LOCK_ID: i64 = 0x7a65_7474_6169;

#[derive(Debug, Error)]
pub enum PostgresSetupError {
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    #[error("failed to apply zettai migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(NonZeroU32);

/// Transaction isolation applied to every transaction a provider begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
        })
    }
}

/// Configuration for the [`TransactionProvider`] connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
    /// Isolation of every transaction (default: read committed)
    pub isolation_level: IsolationLevel,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: NonZeroU32 = match NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600), // 10 minutes
            isolation_level: IsolationLevel::default(),
        }
    }
}

/// Provider whose context is a fresh database transaction per `try_run`.
///
/// Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct TransactionProvider {
    pool: Pool<Postgres>,
    isolation_level: IsolationLevel,
}

impl TransactionProvider {
    /// Connect with default configuration.
    pub async fn connect<S: Into<String>>(connection_string: S) -> Result<Self, PostgresSetupError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect with custom configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresSetupError> {
        let connection_string = connection_string.into();
        let max_connections: NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresSetupError::ConnectionFailed)?;

        info!(
            max_connections = %config.max_connections,
            isolation = %config.isolation_level,
            "[postgres.connect] connection pool ready"
        );

        Ok(Self::from_pool(pool, config.isolation_level))
    }

    /// Build a provider over an existing pool, e.g. one shared with other
    /// components.
    pub fn from_pool(pool: Pool<Postgres>, isolation_level: IsolationLevel) -> Self {
        Self {
            pool,
            isolation_level,
        }
    }

    /// Create the `zettai_events` table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), PostgresSetupError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresSetupError::MigrationFailed)
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn begin(&self) -> Result<PgTransaction, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        query(self.isolation_level.as_sql()).execute(&mut *tx).await?;
        Ok(tx)
    }
}

impl ContextProvider<PgTransaction> for TransactionProvider {
    #[instrument(name = "postgres.try_run", skip_all, fields(isolation = %self.isolation_level))]
    async fn try_run<T>(&self, reader: PostgresReader<T>) -> Outcome<T>
    where
        T: Send + 'static,
    {
        let mut tx = match self.begin().await {
            Ok(tx) => tx,
            Err(error) => {
                error!(error = %error, "[postgres.try_run] failed to begin transaction");
                return Err(ContextError::rolled_back(Box::new(error)));
            }
        };

        let result = AssertUnwindSafe(async { reader.run_with(&mut tx).await })
            .catch_unwind()
            .await;

        let fault: Fault = match result {
            Ok(Ok(value)) => {
                return match tx.commit().await {
                    Ok(()) => Ok(value),
                    Err(error) => {
                        error!(error = %error, "[postgres.try_run] commit failed");
                        Err(ContextError::rolled_back(Box::new(error)))
                    }
                };
            }
            Ok(Err(fault)) => fault,
            Err(payload) => {
                let panicked = ReaderPanicked::from_payload(payload);
                error!(error = %panicked, "[postgres.try_run] reader panicked");
                Box::new(panicked)
            }
        };

        // Dropping the transaction would roll back too, but only once the
        // connection is returned to the pool.
        if let Err(error) = tx.rollback().await {
            warn!(error = %error, "[postgres.try_run] explicit rollback failed");
        }

        warn!(error = %fault, "[postgres.try_run] transaction rolled back");
        Err(ContextError::rolled_back(fault))
    }
}

/// [`EventStreamer`] over the `zettai_events` table.
///
/// Payloads are stored as JSONB, so `E` must round-trip through serde.
pub struct EventStreamerPostgres<E> {
    _event: PhantomData<fn() -> E>,
}

impl<E> EventStreamerPostgres<E> {
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E> Default for EventStreamerPostgres<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventStreamerPostgres<E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<E> EventStreamer<PgTransaction, E> for EventStreamerPostgres<E>
where
    E: EntityEvent + Serialize + DeserializeOwned,
{
    fn store(&self, new_events: Vec<E>) -> PostgresReader<Vec<StoredEvent<E>>> {
        ContextReader::new(move |tx: &mut PgTransaction| Box::pin(append_events::<E>(tx, new_events)))
    }

    fn fetch_by_entity(&self, id: EntityId) -> PostgresReader<Vec<E>> {
        ContextReader::new(move |tx: &mut PgTransaction| Box::pin(select_by_entity::<E>(tx, id)))
    }

    fn fetch_after(&self, cursor: EventSeq) -> PostgresReader<Vec<StoredEvent<E>>> {
        ContextReader::new(move |tx: &mut PgTransaction| Box::pin(select_after::<E>(tx, cursor)))
    }

    fn retrieve_id_from_natural_key(&self, key: &E::NaturalKey) -> PostgresReader<Option<EntityId>> {
        let key = key.clone();
        ContextReader::new(move |tx: &mut PgTransaction| Box::pin(find_by_natural_key::<E>(tx, key)))
    }
}

/// Current time at the precision `TIMESTAMPTZ` keeps (microseconds), so the
/// envelopes `store` returns equal the ones read back later.
fn recorded_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[instrument(name = "postgres.store", skip_all, fields(count = new_events.len()))]
async fn append_events<E>(tx: &mut PgTransaction, new_events: Vec<E>) -> Result<Vec<StoredEvent<E>>, Fault>
where
    E: EntityEvent + Serialize,
{
    if new_events.is_empty() {
        return Ok(Vec::new());
    }

    // Held until commit or rollback; numbering below cannot interleave with
    // another appender.
    query("SELECT pg_advisory_xact_lock($1)")
        .bind(APPEND_LOCK_ID)
        .execute(&mut **tx)
        .await?;

    let next: i64 = query_scalar("SELECT COALESCE(MAX(event_seq), -1) + 1 FROM zettai_events")
        .fetch_one(&mut **tx)
        .await?;

    let recorded_at = recorded_now();
    let mut stored = Vec::with_capacity(new_events.len());

    for (offset, event) in (0_i64..).zip(new_events) {
        let event_seq = EventSeq::new(next + offset);
        let event_data = serde_json::to_value(&event)?;

        query(
            "INSERT INTO zettai_events
                 (event_seq, entity_id, event_type, creates_entity, event_data, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event_seq.into_inner())
        .bind(event.entity_id().into_inner())
        .bind(event.event_type())
        .bind(event.creates_entity())
        .bind(Json(event_data))
        .bind(recorded_at)
        .execute(&mut **tx)
        .await?;

        stored.push(StoredEvent::new(event_seq, recorded_at, event));
    }

    debug!(
        first_seq = next,
        count = stored.len(),
        "[postgres.store] appended events"
    );

    Ok(stored)
}

async fn select_by_entity<E>(tx: &mut PgTransaction, id: EntityId) -> Result<Vec<E>, Fault>
where
    E: DeserializeOwned,
{
    let rows = query("SELECT event_data FROM zettai_events WHERE entity_id = $1 ORDER BY event_seq")
        .bind(id.into_inner())
        .fetch_all(&mut **tx)
        .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let Json(payload): Json<Value> = row.try_get("event_data")?;
        events.push(serde_json::from_value(payload)?);
    }

    Ok(events)
}

async fn select_after<E>(tx: &mut PgTransaction, cursor: EventSeq) -> Result<Vec<StoredEvent<E>>, Fault>
where
    E: DeserializeOwned,
{
    let rows = query(
        "SELECT event_seq, recorded_at, event_data
         FROM zettai_events
         WHERE event_seq > $1
         ORDER BY event_seq",
    )
    .bind(cursor.into_inner())
    .fetch_all(&mut **tx)
    .await?;

    let mut stored = Vec::with_capacity(rows.len());
    for row in rows {
        let event_seq: i64 = row.try_get("event_seq")?;
        let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;
        let Json(payload): Json<Value> = row.try_get("event_data")?;
        stored.push(StoredEvent::new(
            EventSeq::new(event_seq),
            recorded_at,
            serde_json::from_value(payload)?,
        ));
    }

    Ok(stored)
}

async fn find_by_natural_key<E>(
    tx: &mut PgTransaction,
    key: E::NaturalKey,
) -> Result<Option<EntityId>, Fault>
where
    E: EntityEvent + DeserializeOwned,
{
    // Natural keys live inside the payload; scan creation events in order
    // and let the earliest match win.
    let rows = query(
        "SELECT entity_id, event_data
         FROM zettai_events
         WHERE creates_entity
         ORDER BY event_seq",
    )
    .fetch_all(&mut **tx)
    .await?;

    for row in rows {
        let Json(payload): Json<Value> = row.try_get("event_data")?;
        let event: E = serde_json::from_value(payload)?;
        if event.natural_key().as_ref() == Some(&key) {
            let entity_id: Uuid = row.try_get("entity_id")?;
            return Ok(Some(EntityId::new(entity_id)));
        }
    }

    Ok(None)
}
