//! Network Module
//!
//! Handles TCP communication between the master and its secondaries.
//! Every frame is an 8-byte header (length, CRC32) followed by a JSON body.

mod server;
mod client;

pub use server::NetworkServer;
pub use client::NetworkClient;

use crate::replication::{FrameHeader, WireMessage};
use crate::error::{Error, Result};

/// Read one checksummed frame body from a reader
///
/// The body is returned undecoded so a malformed message can be dropped
/// while the stream stays usable.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > FrameHeader::MAX_BODY {
        return Err(Error::Network(format!(
            "Frame of {} bytes exceeds the {} byte limit",
            header.length,
            FrameHeader::MAX_BODY
        )));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    header.verify(&body)?;
    Ok(body)
}

/// Read and decode a framed message
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<WireMessage> {
    let body = read_frame(reader).await?;
    WireMessage::decode(&body)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &WireMessage,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.encode()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::MessageId;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = WireMessage::Ack {
            message_id: MessageId(3),
            endpoint: "s:1".into(),
        };

        write_message(&mut a, &msg).await.unwrap();
        assert_eq!(read_message(&mut b).await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_corrupted_body_is_rejected_but_stream_survives() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = b"{\"kind\":\"register\",\"endpoint\":\"s:1\"}";
        let mut header = FrameHeader::new(body);
        header.checksum ^= 1;
        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(body).await.unwrap();

        let next = WireMessage::Register { endpoint: "s:2".into() };
        write_message(&mut a, &next).await.unwrap();

        assert!(matches!(read_message(&mut b).await, Err(Error::ChecksumMismatch)));
        assert_eq!(read_message(&mut b).await.unwrap(), next);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let header = FrameHeader {
            length: FrameHeader::MAX_BODY + 1,
            checksum: 0,
        };
        a.write_all(&header.to_bytes()).await.unwrap();

        assert!(matches!(read_frame(&mut b).await, Err(Error::Network(_))));
    }
}
