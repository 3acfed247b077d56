use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Letters, digits, `-` and `_` only: names end up in URLs.
fn is_url_safe(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

/// Owner of to-do lists.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 40, predicate = is_url_safe),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct User(String);

/// Name of a list, unique per user.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 40, predicate = is_url_safe),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ListName(String);

/// Natural key of a to-do list: who owns it and what it is called.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserListName {
    pub user: User,
    pub list_name: ListName,
}

impl UserListName {
    pub fn new(user: User, list_name: ListName) -> Self {
        Self { user, list_name }
    }
}
