//! Wire protocol records.
//!
//! Every record is one JSON object on its own line, tagged by a numeric
//! `Type` field:
//!
//! | Type | Record        | Fields                                        |
//! |------|---------------|-----------------------------------------------|
//! | 0    | `WELCOME`     | `Root`, `Recent`, `Major`, `Minor`            |
//! | 1    | `QUERY`       | `UUID`                                        |
//! | 2    | `NEW_MESSAGE` | `UUID`, `Parent`, `Content`, `Username`, `Timestamp` |
//! | 3    | `META`        | `Meta` (string → string)                      |
//!
//! [`ProtocolMessage`] is the typed form; the flat `WireFrame` exists only to
//! bridge serde to that layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;
use crate::meta::MetaKey;

const WELCOME_TYPE: u8 = 0;
const QUERY_TYPE: u8 = 1;
const NEW_MESSAGE_TYPE: u8 = 2;
const META_TYPE: u8 = 3;

/// Errors decoding or interpreting protocol records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The `Type` tag named no known record.
    #[error("unknown protocol message type {0}")]
    UnknownType(u8),

    /// The line was not a JSON record of the expected shape.
    #[error("malformed protocol record: {0}")]
    Json(#[from] serde_json::Error),

    /// A META value did not match its key's format.
    #[error("malformed value for meta key {key}: {value:?}")]
    MalformedMeta { key: String, value: String },
}

/// The server's one-time greeting after connect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Welcome {
    /// Id of the server's tree root.
    pub root: String,
    /// Recently active message ids.
    pub recent: Vec<String>,
    pub major: u8,
    pub minor: u8,
}

/// One framed protocol record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireFrame", into = "WireFrame")]
pub enum ProtocolMessage {
    Welcome(Welcome),
    /// Request for the message with this id.
    Query { id: String },
    NewMessage(Message),
    Meta(BTreeMap<String, String>),
}

impl ProtocolMessage {
    /// A QUERY for `id`.
    pub fn query(id: impl Into<String>) -> Self {
        Self::Query { id: id.into() }
    }

    /// A META record carrying a single recognized key.
    pub fn meta(key: MetaKey, value: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), value.into());
        Self::Meta(map)
    }

    /// Encode as one JSON line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one JSON line.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "WELCOME",
            Self::Query { .. } => "QUERY",
            Self::NewMessage(_) => "NEW_MESSAGE",
            Self::Meta(_) => "META",
        }
    }
}

/// Flat serde image of a record. Absent fields are omitted when encoding.
#[derive(Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "Type")]
    kind: u8,
    #[serde(rename = "Root", default, skip_serializing_if = "Option::is_none")]
    root: Option<String>,
    #[serde(rename = "Recent", default, skip_serializing_if = "Option::is_none")]
    recent: Option<Vec<String>>,
    #[serde(rename = "Major", default, skip_serializing_if = "Option::is_none")]
    major: Option<u8>,
    #[serde(rename = "Minor", default, skip_serializing_if = "Option::is_none")]
    minor: Option<u8>,
    #[serde(rename = "UUID", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "Parent", default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(rename = "Content", default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(rename = "Username", default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(rename = "Meta", default, skip_serializing_if = "Option::is_none")]
    meta: Option<BTreeMap<String, String>>,
}

impl TryFrom<WireFrame> for ProtocolMessage {
    type Error = ProtocolError;

    fn try_from(frame: WireFrame) -> Result<Self, Self::Error> {
        match frame.kind {
            WELCOME_TYPE => Ok(Self::Welcome(Welcome {
                root: frame.root.unwrap_or_default(),
                recent: frame.recent.unwrap_or_default(),
                major: frame.major.unwrap_or_default(),
                minor: frame.minor.unwrap_or_default(),
            })),
            QUERY_TYPE => Ok(Self::Query {
                id: frame.id.unwrap_or_default(),
            }),
            NEW_MESSAGE_TYPE => Ok(Self::NewMessage(Message {
                id: frame.id.unwrap_or_default(),
                parent: frame.parent.unwrap_or_default(),
                content: frame.content.unwrap_or_default(),
                author: frame.author.unwrap_or_default(),
                timestamp: frame.timestamp.unwrap_or_default(),
            })),
            META_TYPE => Ok(Self::Meta(frame.meta.unwrap_or_default())),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

impl From<ProtocolMessage> for WireFrame {
    fn from(message: ProtocolMessage) -> Self {
        match message {
            ProtocolMessage::Welcome(w) => WireFrame {
                kind: WELCOME_TYPE,
                root: Some(w.root),
                recent: Some(w.recent),
                major: Some(w.major),
                minor: Some(w.minor),
                ..Default::default()
            },
            ProtocolMessage::Query { id } => WireFrame {
                kind: QUERY_TYPE,
                id: Some(id),
                ..Default::default()
            },
            ProtocolMessage::NewMessage(m) => WireFrame {
                kind: NEW_MESSAGE_TYPE,
                id: Some(m.id),
                parent: Some(m.parent),
                content: Some(m.content),
                author: Some(m.author),
                timestamp: Some(m.timestamp),
                ..Default::default()
            },
            ProtocolMessage::Meta(map) => WireFrame {
                kind: META_TYPE,
                meta: Some(map),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MSG: &str = r#"{"Type":2,"UUID":"92d24e9d-12cc-4742-6aaf-ea781a6b09ec","Parent":"f4ae0b74-4025-4810-41d6-5148a513c580","Content":"A riveting example message.","Username":"Examplius_Caesar","Timestamp":1537738224}"#;

    #[test]
    fn test_decode_new_message() {
        let decoded = ProtocolMessage::from_line(TEST_MSG).unwrap();
        let ProtocolMessage::NewMessage(m) = decoded else {
            panic!("expected NEW_MESSAGE, got {decoded:?}");
        };
        assert_eq!(m.id, "92d24e9d-12cc-4742-6aaf-ea781a6b09ec");
        assert_eq!(m.parent, "f4ae0b74-4025-4810-41d6-5148a513c580");
        assert_eq!(m.author, "Examplius_Caesar");
        assert_eq!(m.timestamp, 1537738224);
    }

    #[test]
    fn test_decode_welcome() {
        let line = r#"{"Type":0,"Root":"r","Recent":["a","b"],"Major":0,"Minor":1}"#;
        let decoded = ProtocolMessage::from_line(line).unwrap();
        assert_eq!(
            decoded,
            ProtocolMessage::Welcome(Welcome {
                root: "r".into(),
                recent: vec!["a".into(), "b".into()],
                major: 0,
                minor: 1,
            })
        );
    }

    #[test]
    fn test_decode_welcome_null_recent() {
        let line = r#"{"Type":0,"Root":"r","Recent":null,"Major":0,"Minor":1}"#;
        let ProtocolMessage::Welcome(w) = ProtocolMessage::from_line(line).unwrap() else {
            panic!("expected WELCOME");
        };
        assert!(w.recent.is_empty());
    }

    #[test]
    fn test_query_encodes_only_id() {
        let line = ProtocolMessage::query("abc").to_line().unwrap();
        assert_eq!(line, r#"{"Type":1,"UUID":"abc"}"#);
    }

    #[test]
    fn test_meta_encoding() {
        let line = ProtocolMessage::meta(MetaKey::PresenceWho, "").to_line().unwrap();
        assert_eq!(line, r#"{"Type":3,"Meta":{"presence/who":""}}"#);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = ProtocolMessage::from_line(r#"{"Type":9}"#).unwrap_err();
        assert!(err.to_string().contains("unknown protocol message type 9"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ProtocolMessage::from_line("not json").is_err());
        assert!(ProtocolMessage::from_line(r#"{"UUID":"no type"}"#).is_err());
    }
}
