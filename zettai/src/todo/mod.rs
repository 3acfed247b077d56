//! To-do lists as event-sourced entities.
//!
//! Each list is an entity whose history is a sequence of [`ToDoListEvent`]s.
//! A list is found by its [`UserListName`] natural key, carried by the
//! `ListCreated` event, and its current [`ToDoListState`] is the fold of its
//! events.

mod events;
mod names;
mod queries;
mod state;

pub use events::{ToDoItem, ToDoListEvent, ToDoStatus};
pub use names::{ListName, ListNameError, User, UserError, UserListName};
pub use queries::{retrieve_list, UserListsProjection};
pub use state::ToDoListState;
