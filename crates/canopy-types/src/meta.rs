//! Out-of-band META signals.
//!
//! META records carry a string map. Only a few keys are recognized; anything
//! else is logged and ignored by clients.

use strum::{AsRefStr, Display, EnumString};

use crate::protocol::ProtocolError;

/// Recognized META keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
pub enum MetaKey {
    /// Ask every connected client to announce itself.
    #[strum(serialize = "presence/who")]
    PresenceWho,
    /// A client announcing an active session: `username;sessionID;unixTimestamp`.
    #[strum(serialize = "presence/here")]
    PresenceHere,
    /// A client announcing that a session ended: `username;sessionID`.
    #[strum(serialize = "presence/leave")]
    PresenceLeave,
}

const SEPARATOR: char = ';';

/// Parsed `presence/here` value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceHere {
    pub username: String,
    pub session_id: String,
    /// Unix seconds at which the announcing client was last active.
    pub timestamp: i64,
}

impl PresenceHere {
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedMeta {
            key: MetaKey::PresenceHere.to_string(),
            value: value.to_string(),
        };
        let mut parts = value.splitn(3, SEPARATOR);
        let (Some(username), Some(session_id), Some(timestamp)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if username.is_empty() || session_id.is_empty() {
            return Err(malformed());
        }
        let timestamp = timestamp.trim().parse::<i64>().map_err(|_| malformed())?;
        Ok(Self {
            username: username.to_string(),
            session_id: session_id.to_string(),
            timestamp,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.username, self.session_id, self.timestamp
        )
    }
}

/// Parsed `presence/leave` value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceLeave {
    pub username: String,
    pub session_id: String,
}

impl PresenceLeave {
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        match value.split_once(SEPARATOR) {
            Some((username, session_id)) if !username.is_empty() && !session_id.is_empty() => {
                Ok(Self {
                    username: username.to_string(),
                    session_id: session_id.to_string(),
                })
            }
            _ => Err(ProtocolError::MalformedMeta {
                key: MetaKey::PresenceLeave.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}{SEPARATOR}{}", self.username, self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_key_strings() {
        assert_eq!(MetaKey::PresenceHere.as_ref(), "presence/here");
        assert_eq!(MetaKey::from_str("presence/who").unwrap(), MetaKey::PresenceWho);
        assert!(MetaKey::from_str("presence/unknown").is_err());
    }

    #[test]
    fn test_presence_here_parse() {
        let here = PresenceHere::parse("alice;sess-1;1537738224").unwrap();
        assert_eq!(here.username, "alice");
        assert_eq!(here.session_id, "sess-1");
        assert_eq!(here.timestamp, 1537738224);
        assert_eq!(here.encode(), "alice;sess-1;1537738224");
    }

    #[test]
    fn test_presence_here_rejects_garbage() {
        assert!(PresenceHere::parse("alice;sess-1").is_err());
        assert!(PresenceHere::parse(";sess-1;10").is_err());
        assert!(PresenceHere::parse("alice;sess-1;soon").is_err());
    }

    #[test]
    fn test_presence_leave_parse() {
        let leave = PresenceLeave::parse("bob;s2").unwrap();
        assert_eq!(leave.username, "bob");
        assert_eq!(leave.session_id, "s2");
        assert!(PresenceLeave::parse("bob").is_err());
    }
}
