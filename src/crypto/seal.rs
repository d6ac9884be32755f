//! DATA payload sealing and opening for each encryption mode.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

use super::derive::{derive_cbc_hmac_keys, derive_gcm_key, CbcHmacKeys};
use super::{cbc_hmac, gcm, random_bytes, SymmetricKey};
use crate::error::{CryptoError, DataError, Error};
use crate::frame::payload::{CbcHmacRecord, GcmRecord, PlaintextRecord};
use crate::session::handshake::KeyMaterial;
use crate::session::EncMode;

/// Label prefixed to the sequence number in the associated data.
pub const AAD_LABEL: &[u8; 4] = b"DATA";

/// Builds per-message AAD: `"DATA" || seq (u64 BE)`.
///
/// Binding the sequence number means a ciphertext cannot be replayed under a
/// fresh sequence number without failing authentication.
pub fn build_aad(seq: u64) -> [u8; 12] {
    let mut aad = [0u8; 12];
    aad[..4].copy_from_slice(AAD_LABEL);
    aad[4..].copy_from_slice(&seq.to_be_bytes());
    aad
}

enum CipherKeys {
    Plaintext,
    Gcm(Zeroizing<SymmetricKey>),
    CbcHmac(CbcHmacKeys),
}

impl CipherKeys {
    fn derive(mode: EncMode, material: &KeyMaterial) -> Result<Self, CryptoError> {
        match mode {
            EncMode::Plaintext => Ok(Self::Plaintext),
            EncMode::AesGcm | EncMode::DiffieHellman => {
                let bytes = material.as_bytes().ok_or(CryptoError::MissingKeyMaterial)?;
                Ok(Self::Gcm(derive_gcm_key(bytes)?))
            }
            EncMode::AesCbcHmac => {
                let bytes = material.as_bytes().ok_or(CryptoError::MissingKeyMaterial)?;
                Ok(Self::CbcHmac(derive_cbc_hmac_keys(bytes)?))
            }
        }
    }
}

/// Writer side of the data channel. Owns `seqOut`.
pub struct SealingContext {
    mode: EncMode,
    keys: CipherKeys,
    sequence: u64,
}

impl SealingContext {
    pub fn new(mode: EncMode, material: &KeyMaterial) -> Result<Self, CryptoError> {
        Ok(Self {
            mode,
            keys: CipherKeys::derive(mode, material)?,
            sequence: 0,
        })
    }

    pub fn mode(&self) -> EncMode {
        self.mode
    }

    /// Last sequence number used (0 before the first message).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Turn `text` into a DATA payload under the next sequence number.
    pub fn seal(&mut self, text: &str) -> Result<Bytes, Error> {
        let seq = self
            .sequence
            .checked_add(1)
            .ok_or(CryptoError::SequenceOverflow)?;
        self.sequence = seq;

        let payload = match &self.keys {
            CipherKeys::Plaintext => serde_json::to_vec(&PlaintextRecord {
                text: text.to_string(),
            })?,
            CipherKeys::Gcm(key) => {
                let nonce = random_bytes::<{ gcm::NONCE_LEN }>();
                let (ciphertext, tag) = gcm::encrypt(key, &nonce, text.as_bytes(), &build_aad(seq))?;
                serde_json::to_vec(&GcmRecord {
                    seq,
                    nonce: nonce.to_vec(),
                    ciphertext,
                    tag: tag.to_vec(),
                })?
            }
            CipherKeys::CbcHmac(keys) => {
                let iv = random_bytes::<{ cbc_hmac::IV_LEN }>();
                let (ciphertext, mac) = cbc_hmac::encrypt(
                    &keys.enc_key,
                    &keys.mac_key,
                    &iv,
                    text.as_bytes(),
                    &build_aad(seq),
                )?;
                serde_json::to_vec(&CbcHmacRecord {
                    seq,
                    iv: iv.to_vec(),
                    ciphertext,
                    mac: mac.to_vec(),
                })?
            }
        };
        Ok(Bytes::from(payload))
    }
}

/// Reader side of the data channel. Owns `seqIn`.
pub struct OpeningContext {
    mode: EncMode,
    keys: CipherKeys,
    /// The last accepted sequence number. Next accepted must be > this.
    last_sequence: u64,
}

fn parse_record<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DataError> {
    serde_json::from_slice(payload).map_err(|e| DataError::Malformed(e.to_string()))
}

fn check_sequence(received: u64, last: u64) -> Result<(), DataError> {
    if received <= last {
        return Err(DataError::Replay { received, last });
    }
    Ok(())
}

fn into_text(plaintext: Vec<u8>) -> Result<String, DataError> {
    String::from_utf8(plaintext).map_err(|_| DataError::Malformed("plaintext is not UTF-8".into()))
}

impl OpeningContext {
    pub fn new(mode: EncMode, material: &KeyMaterial) -> Result<Self, CryptoError> {
        Ok(Self {
            mode,
            keys: CipherKeys::derive(mode, material)?,
            last_sequence: 0,
        })
    }

    pub fn mode(&self) -> EncMode {
        self.mode
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Recover the text of a DATA payload.
    ///
    /// For encrypted modes the sequence number is checked before any
    /// cryptography runs, and only advances when authentication succeeds.
    pub fn open(&mut self, payload: &[u8]) -> Result<String, DataError> {
        match &self.keys {
            CipherKeys::Plaintext => {
                let record: PlaintextRecord = parse_record(payload)?;
                self.last_sequence = self.last_sequence.saturating_add(1);
                Ok(record.text)
            }
            CipherKeys::Gcm(key) => {
                let record: GcmRecord = parse_record(payload)?;
                check_sequence(record.seq, self.last_sequence)?;
                let plaintext = gcm::decrypt(
                    key,
                    &record.nonce,
                    &record.ciphertext,
                    &record.tag,
                    &build_aad(record.seq),
                )?;
                self.last_sequence = record.seq;
                into_text(plaintext)
            }
            CipherKeys::CbcHmac(keys) => {
                let record: CbcHmacRecord = parse_record(payload)?;
                check_sequence(record.seq, self.last_sequence)?;
                let plaintext = cbc_hmac::decrypt(
                    &keys.enc_key,
                    &keys.mac_key,
                    &record.iv,
                    &record.ciphertext,
                    &record.mac,
                    &build_aad(record.seq),
                )?;
                self.last_sequence = record.seq;
                into_text(plaintext)
            }
        }
    }
}
