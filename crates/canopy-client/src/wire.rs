//! Line framing for protocol records.

use canopy_types::{ProtocolError, ProtocolMessage};
use futures::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::constants::MAX_LINE_BYTES;
use crate::transport::BoxedStream;

pub type WireReader = FramedRead<ReadHalf<BoxedStream>, LinesCodec>;
pub type WireWriter = FramedWrite<WriteHalf<BoxedStream>, LinesCodec>;

/// Errors reading or writing framed records.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("framing error: {0}")]
    Frame(#[from] LinesCodecError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Split `stream` into framed halves.
pub fn framed(stream: BoxedStream) -> (WireReader, WireWriter) {
    let (read, write) = tokio::io::split(stream);
    (
        FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
        FramedWrite::new(write, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
    )
}

/// Encode and write one record.
pub async fn write_message(writer: &mut WireWriter, message: &ProtocolMessage) -> Result<(), WireError> {
    writer.send(message.to_line()?).await?;
    Ok(())
}

/// Read the next record, skipping blank lines. `None` means the peer closed.
pub async fn read_message(reader: &mut WireReader) -> Option<Result<ProtocolMessage, WireError>> {
    loop {
        match reader.next().await? {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => return Some(ProtocolMessage::from_line(&line).map_err(WireError::from)),
            Err(e) => return Some(Err(e.into())),
        }
    }
}
