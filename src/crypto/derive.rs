//! Legacy hash-expand key derivation.
//!
//! This is not a standard KDF: there is no salt and no context binding. It is
//! kept byte-for-byte so keys match existing peers of the protocol.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::SymmetricKey;
use crate::error::CryptoError;

/// Encryption and MAC sub-keys for AES-CBC + HMAC.
pub struct CbcHmacKeys {
    pub enc_key: Zeroizing<SymmetricKey>,
    pub mac_key: Zeroizing<SymmetricKey>,
}

impl std::fmt::Debug for CbcHmacKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CbcHmacKeys(..)")
    }
}

/// 32-byte AEAD key: the first 32 bytes of long material, else SHA-256 of it.
pub fn derive_gcm_key(material: &[u8]) -> Result<Zeroizing<SymmetricKey>, CryptoError> {
    if material.is_empty() {
        return Err(CryptoError::MissingKeyMaterial);
    }
    let mut key = Zeroizing::new([0u8; 32]);
    if material.len() >= 32 {
        key.copy_from_slice(&material[..32]);
    } else {
        key.copy_from_slice(&Sha256::digest(material));
    }
    Ok(key)
}

/// 64-byte blob split into `enc_key = blob[0..32]`, `mac_key = blob[32..64]`.
///
/// Material of 64 bytes or more is truncated; shorter material becomes
/// `SHA-256(k) || SHA-256(k || 0x01)`.
pub fn derive_cbc_hmac_keys(material: &[u8]) -> Result<CbcHmacKeys, CryptoError> {
    if material.is_empty() {
        return Err(CryptoError::MissingKeyMaterial);
    }
    let mut blob = Zeroizing::new([0u8; 64]);
    if material.len() >= 64 {
        blob.copy_from_slice(&material[..64]);
    } else {
        blob[..32].copy_from_slice(&Sha256::digest(material));
        let mut hasher = Sha256::new();
        hasher.update(material);
        hasher.update([0x01]);
        blob[32..].copy_from_slice(&hasher.finalize());
    }

    let mut enc_key = Zeroizing::new([0u8; 32]);
    let mut mac_key = Zeroizing::new([0u8; 32]);
    enc_key.copy_from_slice(&blob[..32]);
    mac_key.copy_from_slice(&blob[32..]);
    Ok(CbcHmacKeys { enc_key, mac_key })
}
