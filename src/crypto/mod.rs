pub mod cbc_hmac;
pub mod derive;
pub mod dh;
pub mod gcm;
pub mod rsa;
pub mod seal;

use rand::rngs::OsRng;
use rand::RngCore;

/// 32-byte symmetric key.
pub type SymmetricKey = [u8; 32];

/// Length of a generated RSA-transported session key.
pub const SESSION_KEY_LEN: usize = 32;

/// Fill an array from the operating system CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}
