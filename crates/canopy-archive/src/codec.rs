//! Archive persistence.
//!
//! History is written as a single JSON array of messages, oldest first,
//! followed by a newline. The whole archive is written every time.
//!
//! Older clients wrote a short binary marker ahead of the array. Readers
//! look at the first bytes of a source, drop the marker if it is there, and
//! put anything else back in front of the remaining stream.

use std::io::{self, Cursor, Read, Write};

use canopy_types::Message;

use crate::archive::Archive;
use crate::error::{ArchiveError, Result};

/// Marker at the head of files written by older clients.
pub const LEGACY_PREFIX: [u8; 7] = [0x06, 0x2f, 0x6a, 0x73, 0x6f, 0x6e, 0x0a];

/// Read the head of `source` and strip [`LEGACY_PREFIX`] if present.
///
/// Bytes read while checking are chained back in front of the rest of the
/// stream, so a source without the marker reads exactly as before.
pub fn skip_legacy_prefix<R: Read>(mut source: R) -> io::Result<io::Chain<Cursor<Vec<u8>>, R>> {
    let mut head = vec![0u8; LEGACY_PREFIX.len()];
    let mut filled = 0;
    while filled < head.len() {
        match source.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    head.truncate(filled);

    if head == LEGACY_PREFIX {
        tracing::debug!("skipping legacy archive prefix");
        head.clear();
    }
    Ok(Cursor::new(head).chain(source))
}

/// Decode the first JSON message list in `source`.
///
/// An empty source decodes to an empty list. Bytes after the list are
/// ignored.
pub fn decode<R: Read>(source: R) -> Result<Vec<Message>> {
    let reader = skip_legacy_prefix(source)?;
    let mut stream = serde_json::Deserializer::from_reader(reader).into_iter::<Vec<Message>>();
    match stream.next() {
        None => Ok(Vec::new()),
        Some(Ok(messages)) => Ok(messages),
        Some(Err(e)) if e.is_io() => Err(ArchiveError::Io(e.into())),
        Some(Err(e)) => Err(ArchiveError::Decode(e)),
    }
}

impl Archive {
    /// Write the entire archive to `sink`.
    pub fn persist<W: Write>(&self, mut sink: W) -> Result<()> {
        let messages: Vec<&Message> = self.iter().collect();
        serde_json::to_writer(&mut sink, &messages).map_err(ArchiveError::Encode)?;
        sink.write_all(b"\n")?;
        sink.flush()?;
        Ok(())
    }

    /// Merge the messages stored in `source` into the archive.
    ///
    /// The source is decoded into a staging batch first. If any staged
    /// message shares an id with a stored message but differs from it, the
    /// whole batch is discarded and [`ArchiveError::IdCollision`] is
    /// returned; the archive is left as it was. Otherwise every staged
    /// message goes through [`Archive::add`].
    pub fn populate<R: Read>(&mut self, source: R) -> Result<()> {
        let staged = decode(source)?;

        for message in &staged {
            if message.id.is_empty() {
                return Err(ArchiveError::NilMessage);
            }
            if let Some(existing) = self.get(&message.id) {
                if existing != message {
                    tracing::warn!(id = %message.id, "archive batch collides with stored message");
                    return Err(ArchiveError::IdCollision {
                        id: message.id.clone(),
                    });
                }
            }
        }

        let count = staged.len();
        for message in staged {
            self.add(message)?;
        }
        tracing::debug!(count, total = self.len(), "populated archive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, parent: &str, timestamp: i64) -> Message {
        Message {
            id: id.into(),
            parent: parent.into(),
            content: format!("content of {id}"),
            author: "tester".into(),
            timestamp,
        }
    }

    #[test]
    fn test_skip_prefix_passthrough() {
        let mut out = String::new();
        skip_legacy_prefix(&b"[1,2,3]"[..])
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "[1,2,3]");
    }

    #[test]
    fn test_skip_prefix_short_source() {
        let mut out = Vec::new();
        skip_legacy_prefix(&b"[]"[..])
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"[]");
    }

    #[test]
    fn test_skip_prefix_strips_marker() {
        let mut data = LEGACY_PREFIX.to_vec();
        data.extend_from_slice(b"[]\n");
        let mut out = Vec::new();
        skip_legacy_prefix(&data[..])
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"[]\n");
    }

    #[test]
    fn test_persist_format() {
        let mut a = Archive::new();
        a.add(msg("b", "a", 2)).unwrap();
        a.add(msg("a", "", 1)).unwrap();

        let mut buf = Vec::new();
        a.persist(&mut buf).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value[0]["UUID"], "a");
        assert_eq!(value[1]["UUID"], "b");
    }

    #[test]
    fn test_populate_empty_source() {
        let mut a = Archive::new();
        a.populate(&b""[..]).unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn test_populate_ignores_trailing_bytes() {
        let mut a = Archive::new();
        a.populate(&br#"[{"UUID":"x","Timestamp":1}]
garbage left over"#[..])
            .unwrap();
        assert!(a.has("x"));
    }

    #[test]
    fn test_populate_rejects_garbage() {
        let mut a = Archive::new();
        let err = a.populate(&b"{not a list"[..]).unwrap_err();
        assert!(matches!(err, ArchiveError::Decode(_)));
    }

    #[test]
    fn test_populate_rejects_idless_batch() {
        let mut a = Archive::new();
        let err = a
            .populate(&br#"[{"UUID":"ok","Timestamp":1},{"Content":"anon"}]"#[..])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NilMessage));
        assert!(a.is_empty());
    }

    #[test]
    fn test_populate_sets_root() {
        let mut a = Archive::new();
        a.populate(&br#"[{"UUID":"r","Timestamp":1},{"UUID":"c","Parent":"r","Timestamp":2}]"#[..])
            .unwrap();
        assert_eq!(a.root().unwrap(), "r");
    }
}
