//! RSA-OAEP (SHA-256) key transport.

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const RSA_BITS: usize = 2048;

/// Ephemeral keypair generated by the Receiver for one handshake.
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh 2048-bit keypair. CPU-heavy; call from a blocking
    /// context when running on an async executor.
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// SubjectPublicKeyInfo in PEM form.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Rsa(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        decrypt_with_private_key(&self.private, ciphertext)
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair").finish_non_exhaustive()
    }
}

pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::Rsa(e.to_string()))
}

pub fn encrypt_with_public_key(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

pub fn decrypt_with_private_key(
    key: &RsaPrivateKey,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_and_unwrap_session_key() {
        let pair = RsaKeyPair::generate().unwrap();
        let pem = pair.public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let public = parse_public_key_pem(&pem).unwrap();
        let session_key = [0x5Au8; 32];
        let wrapped = encrypt_with_public_key(&public, &session_key).unwrap();
        assert_eq!(wrapped.len(), RSA_BITS / 8);

        let unwrapped = pair.decrypt(&wrapped).unwrap();
        assert_eq!(&unwrapped[..], &session_key);
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let pair = RsaKeyPair::generate().unwrap();
        let mut wrapped = encrypt_with_public_key(pair.public_key(), b"key").unwrap();
        wrapped[10] ^= 0xFF;
        assert!(matches!(pair.decrypt(&wrapped), Err(CryptoError::Rsa(_))));
    }

    #[test]
    fn garbage_pem_rejected() {
        assert!(parse_public_key_pem("not a key").is_err());
    }
}
