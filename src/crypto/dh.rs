//! Finite-field Diffie-Hellman over the RFC 3526 3072-bit MODP group.

use std::sync::OnceLock;

use num_bigint::BigUint;
use zeroize::Zeroizing;

use super::random_bytes;
use crate::error::CryptoError;

/// RFC 3526 group 15 prime.
const MODP_3072_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33",
    "A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864",
    "D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2",
    "08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

pub const GENERATOR: u32 = 2;

/// Byte length of the prime, public values and shared secrets.
pub const PUBLIC_KEY_LEN: usize = 384;

/// Bytes of randomness in a private exponent.
const PRIVATE_KEY_LEN: usize = 64;

fn prime() -> &'static BigUint {
    static PRIME: OnceLock<BigUint> = OnceLock::new();
    PRIME.get_or_init(|| {
        BigUint::parse_bytes(MODP_3072_PRIME.as_bytes(), 16).expect("MODP prime is valid hex")
    })
}

/// Left-pad a big-endian integer to the group width.
fn to_fixed_width(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; PUBLIC_KEY_LEN.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

/// One side of a key agreement. The private exponent never leaves it.
pub struct DhParty {
    secret: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl DhParty {
    /// Public value, 384 bytes big-endian.
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Derive the shared secret from the peer's public value.
    ///
    /// Values outside `(1, p - 1)` are rejected to rule out trivial secrets.
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let p = prime();
        let peer = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);
        let p_minus_one = p - &one;
        if peer <= one || peer >= p_minus_one {
            return Err(CryptoError::InvalidDhPublicKey);
        }
        let exponent = BigUint::from_bytes_be(&self.secret);
        let shared = peer.modpow(&exponent, p);
        Ok(Zeroizing::new(to_fixed_width(&shared)))
    }
}

impl std::fmt::Debug for DhParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhParty")
            .field("public_len", &self.public.len())
            .finish_non_exhaustive()
    }
}

/// Generate an ephemeral party with a random private exponent.
pub fn create_party() -> DhParty {
    let secret = Zeroizing::new(random_bytes::<PRIVATE_KEY_LEN>().to_vec());
    let exponent = BigUint::from_bytes_be(&secret);
    let public = BigUint::from(GENERATOR).modpow(&exponent, prime());
    DhParty {
        secret,
        public: to_fixed_width(&public),
    }
}
