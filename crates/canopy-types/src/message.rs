//! The chat message.
//!
//! A `Message` is immutable once it has an id: a second message carrying the
//! same id but different fields is a conflict, never an update.

use serde::{Deserialize, Serialize};

use crate::ids::new_message_id;

/// A single chat message, one node of the conversation tree.
///
/// Field names on the wire and in archive files follow the established
/// format (`UUID`, `Parent`, `Content`, `Username`, `Timestamp`). Missing
/// fields decode to their empty value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique id. Empty only for a message that has not been sent.
    #[serde(rename = "UUID", default)]
    pub id: String,
    /// Parent id; empty for a root.
    #[serde(rename = "Parent", default)]
    pub parent: String,
    /// Message body.
    #[serde(rename = "Content", default)]
    pub content: String,
    /// Author's username.
    #[serde(rename = "Username", default)]
    pub author: String,
    /// Unix seconds. Orders the archive and gates notification freshness.
    #[serde(rename = "Timestamp", default)]
    pub timestamp: i64,
}

impl Message {
    /// A rootless message stamped with the current time. No id is assigned.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: crate::now_secs(),
            ..Default::default()
        }
    }

    /// Assign a fresh random id, replacing any existing one.
    pub fn assign_id(&mut self) {
        self.id = new_message_id();
    }

    /// True if the message has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_empty()
    }
}
