//! Error types for archive operations.

use thiserror::Error;

/// Errors that can occur while mutating, loading or saving an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// A message without an id cannot be stored.
    #[error("message has no id")]
    NilMessage,

    /// Root was requested from an empty archive.
    #[error("no known messages")]
    NoKnownMessages,

    /// An incoming batch carried a different message under a known id.
    ///
    /// The whole batch is discarded when this is returned.
    #[error("message id collision: {id}")]
    IdCollision { id: String },

    /// The backing storage failed.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored history was not a JSON message list.
    #[error("failed to decode archive: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode archive: {0}")]
    Encode(#[source] serde_json::Error),

    /// An archive file path was empty.
    #[error("archive path is empty")]
    EmptyPath,
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
