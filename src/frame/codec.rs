use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use super::{Frame, FrameType, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use crate::error::FrameError;

/// Lazy stream of frames decoded from a byte source.
pub type FrameReader<R> = FramedRead<R, FrameCodec>;

/// Sink that encodes frames onto a byte sink.
pub type FrameWriter<W> = FramedWrite<W, FrameCodec>;

/// Tokio codec for encoding/decoding frames on the wire.
#[derive(Debug)]
pub struct FrameCodec {
    /// Declared length cached from a partial decode.
    current_len: Option<usize>,
    /// Maximum accepted length prefix.
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            current_len: None,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a stricter maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            current_len: None,
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.current_len.take() {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let declared = src.get_u32() as usize;
                if declared > self.max_frame_size {
                    return Err(FrameError::OversizedFrame {
                        declared,
                        max: self.max_frame_size,
                    });
                }
                if declared == 0 {
                    return Err(FrameError::EmptyFrame);
                }
                declared
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            self.current_len = Some(len);
            return Ok(None);
        }

        let frame_type = FrameType::from_u8(src[0])?;
        src.advance(1);
        let payload = src.split_to(len - 1).freeze();

        Ok(Some(Frame {
            frame_type,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode(dst)
    }
}

/// Decode a byte source into a lazy sequence of frames.
///
/// The stream ends after the source reaches EOF or after the first decode
/// error; a new reader is needed for a new connection.
pub fn decode<R: AsyncRead>(reader: R) -> FrameReader<R> {
    FramedRead::new(reader, FrameCodec::new())
}

/// Wrap a byte sink so frames can be sent with `SinkExt::send`.
pub fn writer<W: AsyncWrite>(writer: W) -> FrameWriter<W> {
    FramedWrite::new(writer, FrameCodec::new())
}
