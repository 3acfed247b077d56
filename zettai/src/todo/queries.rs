use std::collections::{BTreeMap, BTreeSet, HashMap};

use zettai_types::{ContextReader, EntityId, EventStreamer, Projector, StoredEvent};

use super::events::ToDoListEvent;
use super::names::{ListName, User, UserListName};
use super::state::ToDoListState;

/// Reader resolving `key` and folding the events of the list it names.
///
/// Both steps run in the same context, so against a transactional backend
/// they see one consistent snapshot. Yields `None` when no list was ever
/// created under `key`.
pub fn retrieve_list<Ctx, S>(
    streamer: &S,
    key: &UserListName,
) -> ContextReader<Ctx, Option<ToDoListState>>
where
    Ctx: Send + 'static,
    S: EventStreamer<Ctx, ToDoListEvent> + Clone + Send + 'static,
{
    let fetcher = streamer.clone();

    streamer
        .retrieve_id_from_natural_key(key)
        .and_then(move |found| match found {
            Some(id) => fetcher
                .fetch_by_entity(id)
                .map(|events| Some(ToDoListState::fold(&events))),
            None => ContextReader::pure(None),
        })
}

/// Read model of every open list, grouped by owner.
///
/// Closed lists drop out of the listing.
#[derive(Debug, Default)]
pub struct UserListsProjection {
    lists: BTreeMap<User, BTreeSet<ListName>>,
    keys: HashMap<EntityId, UserListName>,
}

impl UserListsProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open lists of `user`, alphabetically.
    pub fn lists_of(&self, user: &User) -> Vec<ListName> {
        self.lists
            .get(user)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn users(&self) -> Vec<User> {
        self.lists.keys().cloned().collect()
    }
}

impl Projector for UserListsProjection {
    type Event = ToDoListEvent;

    fn apply(&mut self, stored: &StoredEvent<ToDoListEvent>) {
        match &stored.event {
            ToDoListEvent::ListCreated { id, owner, name } => {
                self.lists
                    .entry(owner.clone())
                    .or_default()
                    .insert(name.clone());
                self.keys
                    .insert(*id, UserListName::new(owner.clone(), name.clone()));
            }
            ToDoListEvent::ListClosed { id, .. } => {
                if let Some(key) = self.keys.remove(id) {
                    if let Some(names) = self.lists.get_mut(&key.user) {
                        names.remove(&key.list_name);
                        if names.is_empty() {
                            self.lists.remove(&key.user);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn name(&self) -> &str {
        "user-lists"
    }
}
