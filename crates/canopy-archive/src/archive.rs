//! The chronological message store.

use std::collections::HashMap;

use canopy_types::Message;

use crate::error::{ArchiveError, Result};

/// Every message this client knows about, oldest first.
///
/// Messages are kept sorted by timestamp; messages with equal timestamps keep
/// their arrival order. An id index sits alongside the sorted list and is
/// rebuilt from the insertion point on every add.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    messages: Vec<Message>,
    index: HashMap<String, usize>,
    /// First rootless message ever added. Never overwritten once set.
    root: Option<String>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `message`.
    ///
    /// A message whose id is already present is ignored, whether or not its
    /// content matches. Batch loads check for differing content beforehand;
    /// see [`Archive::populate`].
    pub fn add(&mut self, message: Message) -> Result<()> {
        if message.id.is_empty() {
            return Err(ArchiveError::NilMessage);
        }
        if self.index.contains_key(&message.id) {
            return Ok(());
        }

        if self.root.is_none() && message.is_root() {
            self.root = Some(message.id.clone());
        }

        let pos = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(pos, message);
        for (i, m) in self.messages.iter().enumerate().skip(pos) {
            self.index.insert(m.id.clone(), i);
        }
        Ok(())
    }

    pub fn has(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&i| &self.messages[i])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// The most recent `n` messages, oldest first.
    pub fn last(&self, n: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..].to_vec()
    }

    /// Up to `n` parent ids that are referenced but not stored.
    ///
    /// The scan runs over the archive in chronological order, collecting one
    /// entry per referencing message, and the last `n` entries are returned.
    /// An id referenced by several messages appears once per reference.
    pub fn needed(&self, n: usize) -> Vec<String> {
        let missing: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| !m.parent.is_empty() && !self.index.contains_key(&m.parent))
            .map(|m| m.parent.as_str())
            .collect();
        let start = missing.len().saturating_sub(n);
        missing[start..].iter().map(|id| id.to_string()).collect()
    }

    /// The tree root.
    ///
    /// This is the first rootless message ever added. If none has been seen
    /// the oldest stored message stands in for it.
    pub fn root(&self) -> Result<String> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        self.messages
            .first()
            .map(|m| m.id.clone())
            .ok_or(ArchiveError::NoKnownMessages)
    }

    /// Ids of the direct children of `id`, oldest first.
    pub fn children_of(&self, id: &str) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| m.parent == id)
            .map(|m| m.id.clone())
            .collect()
    }
}
