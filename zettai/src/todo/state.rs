use chrono::{DateTime, Utc};
use tracing::trace;
use zettai_types::{EntityEvent, EntityId};

use super::events::{ToDoItem, ToDoListEvent};
use super::names::{ListName, User};

/// Current state of one to-do list, rebuilt by folding its events.
#[derive(Debug, Clone, PartialEq)]
pub enum ToDoListState {
    Initial,
    Active {
        id: EntityId,
        owner: User,
        name: ListName,
        items: Vec<ToDoItem>,
    },
    OnHold {
        id: EntityId,
        owner: User,
        name: ListName,
        items: Vec<ToDoItem>,
        reason: String,
    },
    Closed {
        id: EntityId,
        closed_at: DateTime<Utc>,
    },
}

impl ToDoListState {
    /// Fold events, oldest first, starting from [`ToDoListState::Initial`].
    pub fn fold<'a>(events: impl IntoIterator<Item = &'a ToDoListEvent>) -> Self {
        events.into_iter().fold(Self::Initial, Self::apply)
    }

    /// Apply one event. Events that make no sense in the current state leave
    /// it unchanged.
    pub fn apply(self, event: &ToDoListEvent) -> Self {
        match (self, event) {
            (Self::Initial, ToDoListEvent::ListCreated { id, owner, name }) => Self::Active {
                id: *id,
                owner: owner.clone(),
                name: name.clone(),
                items: Vec::new(),
            },
            (
                Self::Active {
                    id,
                    owner,
                    name,
                    mut items,
                },
                ToDoListEvent::ItemAdded { item, .. },
            ) => {
                items.push(item.clone());
                Self::Active {
                    id,
                    owner,
                    name,
                    items,
                }
            }
            (
                Self::Active {
                    id,
                    owner,
                    name,
                    mut items,
                },
                ToDoListEvent::ItemRemoved { item, .. },
            ) => {
                items.retain(|existing| existing != item);
                Self::Active {
                    id,
                    owner,
                    name,
                    items,
                }
            }
            (
                Self::Active {
                    id,
                    owner,
                    name,
                    mut items,
                },
                ToDoListEvent::ItemModified {
                    prev_item, item, ..
                },
            ) => {
                for existing in items.iter_mut().filter(|existing| *existing == prev_item) {
                    existing.clone_from(item);
                }
                Self::Active {
                    id,
                    owner,
                    name,
                    items,
                }
            }
            (
                Self::Active {
                    id,
                    owner,
                    name,
                    items,
                },
                ToDoListEvent::ListPutOnHold { reason, .. },
            ) => Self::OnHold {
                id,
                owner,
                name,
                items,
                reason: reason.clone(),
            },
            (
                Self::OnHold {
                    id,
                    owner,
                    name,
                    items,
                    ..
                },
                ToDoListEvent::ListReleased { .. },
            ) => Self::Active {
                id,
                owner,
                name,
                items,
            },
            (
                Self::Active { id, .. } | Self::OnHold { id, .. },
                ToDoListEvent::ListClosed { closed_at, .. },
            ) => Self::Closed {
                id,
                closed_at: *closed_at,
            },
            (state, ignored) => {
                trace!(
                    event_type = ignored.event_type(),
                    "[todo.fold] event does not apply to current state"
                );
                state
            }
        }
    }

    pub fn items(&self) -> &[ToDoItem] {
        match self {
            Self::Active { items, .. } | Self::OnHold { items, .. } => items,
            Self::Initial | Self::Closed { .. } => &[],
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Initial => None,
            Self::Active { id, .. } | Self::OnHold { id, .. } | Self::Closed { id, .. } => Some(*id),
        }
    }
}
