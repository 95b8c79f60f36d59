//! Shared message and wire types for canopy.
//!
//! This crate is the leaf of the workspace: the immutable chat [`Message`],
//! the framed [`ProtocolMessage`] exchanged with a server, and the
//! out-of-band [`MetaKey`] signals. It has **no internal canopy
//! dependencies**.
//!
//! # Tree Overview
//!
//! ```text
//! root (parent = "")
//!     └── reply (parent = root.id)
//!           └── reply (parent = reply.id)
//!     └── reply (parent = root.id)
//! ```
//!
//! Every message names its parent by id. A parent that has not been received
//! yet is a *gap*; clients backfill gaps by issuing [`ProtocolMessage::Query`].
//!
//! # Key Types
//!
//! | Type                  | Purpose                                          |
//! |-----------------------|--------------------------------------------------|
//! | [`Message`]           | Immutable chat message (id + parent + content)   |
//! | [`ProtocolMessage`]   | One framed record on the wire                    |
//! | [`Welcome`]           | Server greeting naming root and recent ids       |
//! | [`MetaKey`]           | Recognized out-of-band signal keys               |
//! | [`PresenceHere`]      | Parsed `presence/here` announcement              |

pub mod ids;
pub mod message;
pub mod meta;
pub mod protocol;

pub use ids::new_message_id;
pub use message::Message;
pub use meta::{MetaKey, PresenceHere, PresenceLeave};
pub use protocol::{ProtocolError, ProtocolMessage, Welcome};

/// Current time as Unix seconds. Message timestamps use this resolution.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
