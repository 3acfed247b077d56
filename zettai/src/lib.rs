//! Zettai - event-sourced storage core for a to-do list application.
//!
//! Domain code describes persistence as [`ContextReader`]s built by an
//! [`EventStreamer`], and hands them to a [`ContextProvider`] that owns the
//! backing resource:
//!
//! - [`memory`]: a process-local log shared by every provider clone
//! - `postgres` (feature `postgres`): one database transaction per run,
//!   rolled back whenever the reader fails
//!
//! The [`todo`] module instantiates the core for to-do lists.
//!
//! ```ignore
//! use zettai::memory::{EventStreamerInMemory, InMemoryEventsProvider};
//! use zettai::todo::{retrieve_list, ToDoListEvent};
//!
//! let provider = InMemoryEventsProvider::new();
//! let streamer = EventStreamerInMemory::<ToDoListEvent>::new();
//!
//! provider.try_run(streamer.store(vec![created])).await?;
//! let list = provider.try_run(retrieve_list(&streamer, &key)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod todo;

pub use zettai_types::{
    catch_up, ContextError, ContextProvider, ContextReader, EntityEvent, EntityId, EventSeq,
    EventStreamer, Fault, Outcome, Projector, ReaderPanicked, StoredEvent,
};

/// In-memory backend.
pub mod memory {
    pub use zettai_memory::{
        EventStreamerInMemory, InMemoryEventsProvider, InMemoryEventsReader, InMemoryLog,
        InMemoryRef,
    };
}

/// PostgreSQL backend.
#[cfg(feature = "postgres")]
pub mod postgres {
    pub use zettai_postgres::{
        EventStreamerPostgres, IsolationLevel, MaxConnections, PgTransaction, PostgresConfig,
        PostgresReader, PostgresSetupError, TransactionProvider,
    };
}
