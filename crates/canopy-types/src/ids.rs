//! Message identifiers.
//!
//! Ids are opaque strings on the wire. Servers and other clients may use any
//! scheme; ids minted locally are random UUIDs in hyphenated form. The empty
//! string is reserved to mean "no parent".

/// Mint a fresh message id (UUIDv4, hyphenated).
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
