//! Outbound record construction.

use canopy_archive::Archive;
use canopy_types::{Message, MetaKey, PresenceHere, PresenceLeave, ProtocolMessage};
use tokio::sync::mpsc;

use crate::ClientError;

/// Builds protocol records and queues them for the send loop.
///
/// The queue outlives individual connections: records composed while
/// disconnected are written once the next connection is up.
#[derive(Clone)]
pub struct Composer {
    username: String,
    tx: mpsc::UnboundedSender<ProtocolMessage>,
}

impl Composer {
    pub(crate) fn new(username: String, tx: mpsc::UnboundedSender<ProtocolMessage>) -> Self {
        Self { username, tx }
    }

    fn send(&self, message: ProtocolMessage) -> Result<(), ClientError> {
        self.tx.send(message).map_err(|_| ClientError::Shutdown)
    }

    /// Send `content` as a reply to `parent`. Returns the message as sent.
    pub fn reply(&self, parent: &str, content: &str) -> Result<Message, ClientError> {
        let mut message = Message {
            parent: parent.to_string(),
            author: self.username.clone(),
            ..Message::new(content)
        };
        message.assign_id();
        self.send(ProtocolMessage::NewMessage(message.clone()))?;
        Ok(message)
    }

    /// Ask the server for the message with `id`.
    pub fn query(&self, id: &str) -> Result<(), ClientError> {
        self.send(ProtocolMessage::query(id))
    }

    /// Ask every connected client to announce its sessions.
    pub fn ask_who(&self) -> Result<(), ClientError> {
        self.send(ProtocolMessage::meta(MetaKey::PresenceWho, ""))
    }

    pub fn announce_here(&self, session_id: &str) -> Result<(), ClientError> {
        let here = PresenceHere {
            username: self.username.clone(),
            session_id: session_id.to_string(),
            timestamp: canopy_types::now_secs(),
        };
        self.send(ProtocolMessage::meta(MetaKey::PresenceHere, here.encode()))
    }

    pub fn announce_leaving(&self, session_id: &str) -> Result<(), ClientError> {
        let leave = PresenceLeave {
            username: self.username.clone(),
            session_id: session_id.to_string(),
        };
        self.send(ProtocolMessage::meta(MetaKey::PresenceLeave, leave.encode()))
    }

    /// Query up to `n` missing parents. Returns how many queries were sent.
    pub fn query_needed(&self, archive: &Archive, n: usize) -> Result<usize, ClientError> {
        let needed = archive.needed(n);
        for id in &needed {
            self.query(id)?;
        }
        log::debug!("queried {} missing parents", needed.len());
        Ok(needed.len())
    }
}
