//! Replication Protocol
//!
//! Frames exchanged between the primary and its secondaries, plus the
//! frames writer clients send to the primary.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::MessageId;
use crate::log::{ClientId, Message, WriteConcern};
use crate::state::Endpoint;

/// Messages on the primary <-> secondary channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireMessage {
    /// Primary -> secondary: a logged message
    Replicate {
        id: MessageId,
        message: String,
        wc: WriteConcern,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ClientId>,
    },

    /// Secondary -> primary: announce the endpoint to replicate to
    Register { endpoint: Endpoint },

    /// Secondary -> primary: message applied
    Ack {
        message_id: MessageId,
        endpoint: Endpoint,
    },
}

impl WireMessage {
    /// Build the replication frame for a logged message
    pub fn replicate(message: &Message) -> Self {
        WireMessage::Replicate {
            id: message.id,
            message: message.text.clone(),
            wc: message.write_concern,
            source: message.source.clone(),
        }
    }

    /// Serialize to a JSON frame body
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a JSON frame body
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedFrame(e.to_string()))
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::Replicate { .. } => "Replicate",
            WireMessage::Register { .. } => "Register",
            WireMessage::Ack { .. } => "Ack",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// Body checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest body accepted from a peer
    pub const MAX_BODY: u32 = 16 * 1024 * 1024;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }

    /// Check a body against this header
    pub fn verify(&self, body: &[u8]) -> Result<()> {
        if crc32fast::hash(body) != self.checksum {
            return Err(Error::ChecksumMismatch);
        }
        Ok(())
    }
}

/// Text frame sent by a writer client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Append a message with the given write concern
    Write { text: String, wc: WriteConcern },
    /// Ask for the sequential log read
    GetLog,
}

#[derive(Deserialize)]
struct WriteFrame {
    message: String,
    wc: u8,
}

impl ClientFrame {
    /// Command asking for the next log entry
    pub const GET_LOG: &'static str = "getLog";

    /// Parse a writer frame
    ///
    /// Accepts `{"message": "...", "wc": N}` as well as the plain
    /// `text,N` form, where the write concern follows the last comma.
    pub fn parse(frame: &str) -> Result<Self> {
        let frame = frame.trim();
        if frame == Self::GET_LOG {
            return Ok(ClientFrame::GetLog);
        }

        if frame.starts_with('{') {
            let write: WriteFrame = serde_json::from_str(frame)
                .map_err(|e| Error::MalformedFrame(e.to_string()))?;
            return Ok(ClientFrame::Write {
                text: write.message,
                wc: WriteConcern::try_from(write.wc)?,
            });
        }

        let (text, level) = frame
            .rsplit_once(',')
            .ok_or_else(|| Error::MalformedFrame(format!("missing write concern in {:?}", frame)))?;
        let level: u8 = level
            .trim()
            .parse()
            .map_err(|_| Error::MalformedFrame(format!("bad write concern {:?}", level)))?;

        Ok(ClientFrame::Write {
            text: text.to_string(),
            wc: WriteConcern::try_from(level)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicate_frame_shape() {
        let msg = Message::new(MessageId(7), "hello", WriteConcern::AtLeastOne, Some("3".into()));
        let json: serde_json::Value =
            serde_json::from_slice(&WireMessage::replicate(&msg).encode().unwrap()).unwrap();

        assert_eq!(json["kind"], "replicate");
        assert_eq!(json["id"], 7);
        assert_eq!(json["message"], "hello");
        assert_eq!(json["wc"], 2);
        assert_eq!(json["source"], "3");
    }

    #[test]
    fn test_ack_frame_decodes() {
        let frame = br#"{"kind":"ack","message_id":12,"endpoint":"10.0.0.2:7654"}"#;
        let msg = WireMessage::decode(frame).unwrap();

        assert_eq!(
            msg,
            WireMessage::Ack {
                message_id: MessageId(12),
                endpoint: "10.0.0.2:7654".into(),
            }
        );
        assert_eq!(msg.type_name(), "Ack");
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(
            WireMessage::decode(b"ACK[1, 'x']"),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            WireMessage::decode(br#"{"kind":"replicate","id":1,"message":"x","wc":9}"#),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_frame_header() {
        let data = b"test message data";
        let header = FrameHeader::new(data);
        let restored = FrameHeader::from_bytes(&header.to_bytes());

        assert_eq!(header.length, restored.length);
        assert_eq!(header.checksum, restored.checksum);
        assert!(restored.verify(data).is_ok());
        assert!(matches!(restored.verify(b"tampered"), Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn test_client_frame_json() {
        assert_eq!(
            ClientFrame::parse(r#"{"message": "hello", "wc": 2}"#).unwrap(),
            ClientFrame::Write {
                text: "hello".into(),
                wc: WriteConcern::AtLeastOne,
            }
        );
    }

    #[test]
    fn test_client_frame_plain() {
        assert_eq!(
            ClientFrame::parse("a, b and c,3").unwrap(),
            ClientFrame::Write {
                text: "a, b and c".into(),
                wc: WriteConcern::Quorum,
            }
        );
        assert_eq!(ClientFrame::parse("getLog").unwrap(), ClientFrame::GetLog);
    }

    #[test]
    fn test_client_frame_errors() {
        assert!(matches!(ClientFrame::parse("no concern"), Err(Error::MalformedFrame(_))));
        assert!(matches!(ClientFrame::parse("text,x"), Err(Error::MalformedFrame(_))));
        assert!(matches!(
            ClientFrame::parse("text,5"),
            Err(Error::InvalidWriteConcern(5))
        ));
    }
}
