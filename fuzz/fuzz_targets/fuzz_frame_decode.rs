#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use securelink::frame::codec::FrameCodec;
use securelink::session::channel::Message;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the frame decoder and ensure no panics.
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(data);

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(frame)) => {
                // Post-handshake classification parses ERROR payloads leniently.
                let _ = Message::from_frame(frame);
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
});
