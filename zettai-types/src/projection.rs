//! Read models derived from the log.
//!
//! A [`Projector`] folds stored events into a read model. [`catch_up`] feeds it
//! every event appended after a cursor and returns the advanced cursor, so a
//! subscriber that keeps calling it with the returned value consumes each new
//! event exactly once, in order.

use tracing::{debug, instrument};

use crate::context::ContextProvider;
use crate::errors::Outcome;
use crate::event::{EntityEvent, EventSeq, StoredEvent};
use crate::streamer::EventStreamer;

/// Trait for transforming stored events into read model updates.
///
/// # Example
///
/// ```ignore
/// struct ListCounter { lists: usize }
///
/// impl Projector for ListCounter {
///     type Event = ToDoListEvent;
///
///     fn apply(&mut self, stored: &StoredEvent<ToDoListEvent>) {
///         if stored.event.creates_entity() {
///             self.lists += 1;
///         }
///     }
///
///     fn name(&self) -> &str {
///         "list-counter"
///     }
/// }
/// ```
pub trait Projector {
    /// The domain event type this projector handles.
    type Event;

    /// Process one event. Called in sequence order.
    fn apply(&mut self, stored: &StoredEvent<Self::Event>);

    /// Stable identifier used in logs.
    fn name(&self) -> &str;
}

/// Apply every event after `cursor` to `projector` and return the new cursor.
///
/// The returned cursor is the sequence number of the last event applied, or
/// `cursor` itself when the log holds nothing newer.
#[instrument(
    name = "projection.catch_up",
    skip_all,
    fields(projector = projector.name(), cursor = %cursor)
)]
pub async fn catch_up<Ctx, E, P, S, J>(
    provider: &P,
    streamer: &S,
    projector: &mut J,
    cursor: EventSeq,
) -> Outcome<EventSeq>
where
    Ctx: Send + 'static,
    E: EntityEvent,
    P: ContextProvider<Ctx>,
    S: EventStreamer<Ctx, E>,
    J: Projector<Event = E>,
{
    let new_events = provider.try_run(streamer.fetch_after(cursor)).await?;

    let mut position = cursor;
    for stored in &new_events {
        projector.apply(stored);
        position = stored.event_seq;
    }

    debug!(
        applied = new_events.len(),
        position = %position,
        "[projection.catch_up] projector caught up"
    );

    Ok(position)
}
