//! Deferred operations over a backend context, and the providers that run them.
//!
//! A [`ContextReader`] describes work to be done against some context resource
//! (`Ctx`): the shared in-memory log, a live database transaction, ... Building
//! a reader does nothing. Only a [`ContextProvider`] runs it, supplying exactly
//! one context instance per call and turning every fault into an [`Outcome`].

use std::future::Future;

use futures::future::BoxFuture;

use crate::errors::{Fault, Outcome};

type RunFn<Ctx, T> = Box<dyn for<'c> FnOnce(&'c mut Ctx) -> BoxFuture<'c, Result<T, Fault>> + Send>;

/// A composable operation that, given a context `Ctx`, produces a `T`.
///
/// Readers may fail with a [`Fault`] (or even panic); neither escapes the
/// provider that runs them.
///
/// # Example
///
/// ```ignore
/// let reader = streamer
///     .store(vec![created])
///     .and_then(move |_| streamer.fetch_by_entity(id));
///
/// let events = provider.try_run(reader).await?;
/// ```
#[must_use = "readers do nothing until run by a ContextProvider"]
pub struct ContextReader<Ctx, T> {
    run: RunFn<Ctx, T>,
}

impl<Ctx, T> ContextReader<Ctx, T>
where
    Ctx: Send + 'static,
    T: Send + 'static,
{
    /// Build a reader from an async closure over the context.
    ///
    /// ```ignore
    /// ContextReader::new(|tx: &mut PgTransaction| {
    ///     Box::pin(async move {
    ///         let row = sqlx::query("SELECT 1").fetch_one(&mut **tx).await?;
    ///         Ok(row.len())
    ///     })
    /// })
    /// ```
    pub fn new<F>(run: F) -> Self
    where
        F: for<'c> FnOnce(&'c mut Ctx) -> BoxFuture<'c, Result<T, Fault>> + Send + 'static,
    {
        Self { run: Box::new(run) }
    }

    /// Build a reader from a synchronous closure over the context.
    ///
    /// The closure is only called once the reader is polled, so panics it
    /// raises are still observed by the provider.
    pub fn from_fn<F>(run: F) -> Self
    where
        F: FnOnce(&mut Ctx) -> Result<T, Fault> + Send + 'static,
    {
        Self::new(move |ctx| Box::pin(async move { run(ctx) }))
    }

    /// A reader that ignores the context and yields `value`.
    pub fn pure(value: T) -> Self {
        Self::from_fn(move |_| Ok(value))
    }

    /// A reader that fails with `fault` without touching the context.
    pub fn fail(fault: impl Into<Fault>) -> Self {
        let fault = fault.into();
        Self::from_fn(move |_| Err(fault))
    }

    /// Run against `ctx`. Only providers should call this.
    pub fn run_with(self, ctx: &mut Ctx) -> BoxFuture<'_, Result<T, Fault>> {
        (self.run)(ctx)
    }

    /// Transform the produced value.
    pub fn map<U, F>(self, f: F) -> ContextReader<Ctx, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        ContextReader::new(move |ctx| {
            Box::pin(async move { self.run_with(ctx).await.map(f) })
        })
    }

    /// Sequence a second reader after this one.
    ///
    /// Both run against the same context instance, so `next` observes every
    /// effect of `self`. A fault in `self` short-circuits: `next` is never built.
    pub fn and_then<U, F>(self, next: F) -> ContextReader<Ctx, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ContextReader<Ctx, U> + Send + 'static,
    {
        ContextReader::new(move |ctx| {
            Box::pin(async move {
                match self.run_with(ctx).await {
                    Ok(value) => next(value).run_with(ctx).await,
                    Err(fault) => Err(fault),
                }
            })
        })
    }
}

/// Owns or obtains a context resource and runs readers against it.
///
/// Implementations must:
/// - supply exactly one `Ctx` instance per call and hand that same instance
///   to the reader;
/// - convert any fault or panic raised by the reader into a
///   [`ContextError`](crate::ContextError) instead of letting it escape;
/// - for transactional backends, roll back before reporting a failure and
///   commit on success.
///
/// Implementations include:
/// - `zettai-memory`: `InMemoryEventsProvider`, context is the shared log
/// - `zettai-postgres`: `TransactionProvider`, context is a live transaction
pub trait ContextProvider<Ctx> {
    /// Run `reader` against a freshly obtained context.
    fn try_run<T>(&self, reader: ContextReader<Ctx, T>) -> impl Future<Output = Outcome<T>> + Send
    where
        T: Send + 'static;
}

/// Allows passing providers by reference wherever a provider is expected.
impl<Ctx, P> ContextProvider<Ctx> for &P
where
    P: ContextProvider<Ctx> + Sync,
{
    fn try_run<T>(&self, reader: ContextReader<Ctx, T>) -> impl Future<Output = Outcome<T>> + Send
    where
        T: Send + 'static,
    {
        (**self).try_run(reader)
    }
}
