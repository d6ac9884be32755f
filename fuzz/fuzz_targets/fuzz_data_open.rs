#![no_main]

use libfuzzer_sys::fuzz_target;

use securelink::crypto::seal::OpeningContext;
use securelink::session::handshake::KeyMaterial;
use securelink::EncMode;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, payload)) = data.split_first() else {
        return;
    };
    let mode = EncMode::ALL[usize::from(selector) % EncMode::ALL.len()];
    let material = KeyMaterial::session_key(vec![0x42; 32]);

    // Arbitrary DATA payloads must be rejected cleanly in every mode.
    let mut opener = OpeningContext::new(mode, &material).unwrap();
    let before = opener.last_sequence();
    if opener.open(payload).is_err() && mode.is_encrypted() {
        assert_eq!(opener.last_sequence(), before);
    }
});
