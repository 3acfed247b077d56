use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zettai_types::{EntityEvent, EntityId};

use super::names::{ListName, User, UserListName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToDoStatus {
    Todo,
    InProgress,
    Done,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToDoItem {
    pub description: String,
    pub status: ToDoStatus,
}

impl ToDoItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: ToDoStatus::Todo,
        }
    }

    pub fn with_status(self, status: ToDoStatus) -> Self {
        Self { status, ..self }
    }
}

/// Everything that can happen to a to-do list.
///
/// `ListCreated` is the only creation event; it carries the list's
/// [`UserListName`] natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToDoListEvent {
    ListCreated {
        id: EntityId,
        owner: User,
        name: ListName,
    },
    ItemAdded {
        id: EntityId,
        item: ToDoItem,
    },
    ItemRemoved {
        id: EntityId,
        item: ToDoItem,
    },
    ItemModified {
        id: EntityId,
        prev_item: ToDoItem,
        item: ToDoItem,
    },
    ListPutOnHold {
        id: EntityId,
        reason: String,
    },
    ListReleased {
        id: EntityId,
    },
    ListClosed {
        id: EntityId,
        closed_at: DateTime<Utc>,
    },
}

impl ToDoListEvent {
    pub fn id(&self) -> EntityId {
        match self {
            Self::ListCreated { id, .. }
            | Self::ItemAdded { id, .. }
            | Self::ItemRemoved { id, .. }
            | Self::ItemModified { id, .. }
            | Self::ListPutOnHold { id, .. }
            | Self::ListReleased { id }
            | Self::ListClosed { id, .. } => *id,
        }
    }
}

impl EntityEvent for ToDoListEvent {
    type NaturalKey = UserListName;

    fn entity_id(&self) -> EntityId {
        self.id()
    }

    fn natural_key(&self) -> Option<UserListName> {
        match self {
            Self::ListCreated { owner, name, .. } => {
                Some(UserListName::new(owner.clone(), name.clone()))
            }
            _ => None,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            Self::ListCreated { .. } => "ListCreated",
            Self::ItemAdded { .. } => "ItemAdded",
            Self::ItemRemoved { .. } => "ItemRemoved",
            Self::ItemModified { .. } => "ItemModified",
            Self::ListPutOnHold { .. } => "ListPutOnHold",
            Self::ListReleased { .. } => "ListReleased",
            Self::ListClosed { .. } => "ListClosed",
        }
    }
}
