//! AES-256-CBC with HMAC-SHA-256 in encrypt-then-MAC order.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::SymmetricKey;
use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const IV_LEN: usize = 16;
pub const MAC_LEN: usize = 32;

fn compute_mac(
    mac_key: &SymmetricKey,
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<HmacSha256, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(mac_key).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: 32,
            actual: mac_key.len(),
        }
    })?;
    mac.update(aad);
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac)
}

/// Encrypt `plaintext` and authenticate `aad || iv || ciphertext`.
pub fn encrypt(
    enc_key: &SymmetricKey,
    mac_key: &SymmetricKey,
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; MAC_LEN]), CryptoError> {
    let cipher = Aes256CbcEnc::new_from_slices(enc_key, iv).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: 32,
            actual: enc_key.len(),
        }
    })?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = compute_mac(mac_key, aad, iv, &ciphertext)?.finalize().into_bytes();
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&tag);
    Ok((ciphertext, mac))
}

/// Verify the MAC in constant time, then decrypt.
///
/// Nothing is decrypted unless the MAC matches, so padding errors are only
/// reachable with a correctly authenticated ciphertext.
pub fn decrypt(
    enc_key: &SymmetricKey,
    mac_key: &SymmetricKey,
    iv: &[u8],
    ciphertext: &[u8],
    mac: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    compute_mac(mac_key, aad, iv, ciphertext)?
        .verify_slice(mac)
        .map_err(|_| CryptoError::MacVerificationFailed)?;

    let cipher = Aes256CbcDec::new_from_slices(enc_key, iv).map_err(|_| {
        CryptoError::InvalidNonceLength {
            expected: IV_LEN,
            actual: iv.len(),
        }
    })?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
