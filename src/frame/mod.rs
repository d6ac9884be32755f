pub mod codec;
pub mod payload;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{Error, FrameError};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum value of the length prefix (type byte + payload): 1 MiB.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Hello = 0x01,
    Negotiate = 0x02,
    KeyExchange = 0x03,
    Data = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Close = 0x07,
}

impl FrameType {
    pub fn from_u8(v: u8) -> std::result::Result<Self, FrameError> {
        match v {
            0x01 => Ok(Self::Hello),
            0x02 => Ok(Self::Negotiate),
            0x03 => Ok(Self::KeyExchange),
            0x04 => Ok(Self::Data),
            0x05 => Ok(Self::Ack),
            0x06 => Ok(Self::Error),
            0x07 => Ok(Self::Close),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Negotiate => "NEGOTIATE",
            Self::KeyExchange => "KEY_EXCHANGE",
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Error => "ERROR",
            Self::Close => "CLOSE",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A complete frame: type + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Build a frame whose payload is the JSON encoding of `record`.
    pub fn json<T: Serialize>(frame_type: FrameType, record: &T) -> Result<Self, Error> {
        let payload = serde_json::to_vec(record)?;
        Ok(Self::new(frame_type, payload))
    }

    /// Create a close frame (empty payload).
    pub fn close() -> Self {
        Self::new(FrameType::Close, Bytes::new())
    }

    /// Value of the length prefix for this frame.
    pub fn wire_len(&self) -> usize {
        1 + self.payload.len()
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> std::result::Result<(), FrameError> {
        let len = self.wire_len();
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        dst.reserve(LENGTH_PREFIX_SIZE + len);
        // Bounded by MAX_FRAME_SIZE above, so the cast cannot truncate.
        dst.put_u32(len as u32);
        dst.put_u8(self.frame_type as u8);
        dst.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Encode a single frame into its wire form.
pub fn encode(frame_type: FrameType, payload: &[u8]) -> std::result::Result<Bytes, FrameError> {
    let frame = Frame::new(frame_type, Bytes::copy_from_slice(payload));
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + frame.wire_len());
    frame.encode(&mut buf)?;
    Ok(buf.freeze())
}
