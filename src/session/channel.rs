//! Post-handshake frame handling shared by the Sender and Receiver.

use bytes::Bytes;

use crate::frame::payload::{ErrorPayload, ErrorReason};
use crate::frame::{Frame, FrameType};

/// A frame received once the session is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Sealed DATA payload, still to be opened.
    Data(Bytes),
    /// Error report from the peer.
    Error(ErrorPayload),
    /// Peer-initiated shutdown.
    Close,
    /// Handshake frame arriving after the handshake; ignored by both roles.
    Unexpected(FrameType),
}

impl Message {
    pub fn from_frame(frame: Frame) -> Self {
        match frame.frame_type {
            FrameType::Data => Self::Data(frame.payload),
            FrameType::Close => Self::Close,
            FrameType::Error => Self::Error(parse_error(&frame.payload)),
            other => Self::Unexpected(other),
        }
    }
}

/// Lenient ERROR parsing: anything that is not a well-formed record is kept
/// as its lossy text.
fn parse_error(payload: &[u8]) -> ErrorPayload {
    serde_json::from_slice(payload).unwrap_or_else(|_| ErrorPayload {
        reason: ErrorReason::Other,
        message: String::from_utf8_lossy(payload).into_owned(),
        declared: None,
    })
}
