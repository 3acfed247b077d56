use std::any::Any;

use thiserror::Error;

/// Any failure raised while a [`ContextReader`](crate::ContextReader) runs.
///
/// Readers propagate backend errors (`sqlx::Error`, `serde_json::Error`, ...)
/// with `?`; they are boxed into a `Fault` and only turned into a
/// [`ContextError`] at the provider boundary.
pub type Fault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of running a reader through a [`ContextProvider`](crate::ContextProvider).
///
/// Callers branch on `Ok`/`Err` (or chain with `map`, `and_then`, `?`); a
/// failure can never be dropped silently because `Result` is `#[must_use]`.
pub type Outcome<T> = Result<T, ContextError>;

/// Error produced exclusively by a provider when the reader it runs fails.
///
/// Both flavors carry a human-readable message and the underlying fault,
/// available through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum ContextError {
    /// A reader failed while running against the in-memory log.
    #[error("{message}")]
    InMemoryOperation {
        message: String,
        #[source]
        cause: Option<Fault>,
    },

    /// A reader failed inside a database transaction, which was rolled back.
    #[error("{message}")]
    TransactionRolledBack {
        message: String,
        #[source]
        cause: Option<Fault>,
    },
}

impl ContextError {
    pub fn in_memory(cause: Fault) -> Self {
        Self::InMemoryOperation {
            message: format!("Operation failed because {cause}"),
            cause: Some(cause),
        }
    }

    pub fn rolled_back(cause: Fault) -> Self {
        Self::TransactionRolledBack {
            message: format!("Transaction rolled back because {cause}"),
            cause: Some(cause),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InMemoryOperation { message, .. } | Self::TransactionRolledBack { message, .. } => {
                message
            }
        }
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::InMemoryOperation { cause, .. } | Self::TransactionRolledBack { cause, .. } => {
                cause.as_deref()
            }
        }
    }
}

/// Fault recorded when a reader panics instead of returning an error.
#[derive(Debug, Error)]
#[error("reader panicked: {message}")]
pub struct ReaderPanicked {
    message: String,
}

impl ReaderPanicked {
    /// Build from the payload returned by `catch_unwind`.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
