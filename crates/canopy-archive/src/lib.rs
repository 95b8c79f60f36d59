//! Local message archive for canopy.
//!
//! The [`Archive`] is the client's authoritative replica of the conversation
//! tree. It accepts messages in any order, keeps them sorted by timestamp,
//! and refuses to let a second copy of a known id change what is stored.
//!
//! ```text
//!   network ──add──┐
//!                  ▼
//!   file ──populate──▶ Archive ──last(n)──▶ cursor / display
//!                      │    │
//!                      │    └──needed(n)──▶ QUERY backfill
//!                      └──persist──▶ file
//! ```
//!
//! # Conflict Rules
//!
//! | Situation                                   | Result                          |
//! |---------------------------------------------|---------------------------------|
//! | `add` of a known id                         | ignored, `Ok`                   |
//! | `populate` batch with a known id, same data | ignored, `Ok`                   |
//! | `populate` batch with a known id, new data  | whole batch dropped, `IdCollision` |
//!
//! Gap detection is [`Archive::needed`]: parents that are referenced but
//! not stored, most recent references last.

mod archive;
pub mod codec;
mod error;
pub mod manager;

pub use archive::Archive;
pub use codec::LEGACY_PREFIX;
pub use error::{ArchiveError, Result};
pub use manager::{ArchiveManager, Opener, SharedArchive, Storage, open_file, shared_archive};
