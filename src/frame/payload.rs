//! JSON records carried in frame payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::Role;
use crate::session::{EncMode, HandshakeParams, KxMode};

/// Serde adapter storing binary fields as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// HELLO: the Sender's declared parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub role: Role,
    pub enc_mode: EncMode,
    pub kx_mode: KxMode,
    #[serde(default)]
    pub demo_mode: bool,
}

impl Hello {
    pub fn params(&self) -> HandshakeParams {
        HandshakeParams::new(self.enc_mode, self.kx_mode)
    }
}

/// KEY_EXCHANGE from the Receiver: its ephemeral contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeOffer {
    #[serde(flatten)]
    pub params: HandshakeParams,
    /// PEM-encoded SubjectPublicKeyInfo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsa_public_key: Option<String>,
    /// Base64 big-endian DH public value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dh_public_key: Option<String>,
}

/// KEY_EXCHANGE from the Sender (RSA and DH only).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dh_public_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub const OK: Ack = Ack { ok: true };
}

/// Machine-readable reason carried in an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    ModeMismatch,
    PskRequired,
    #[serde(other)]
    Other,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ModeMismatch => "mode_mismatch",
            Self::PskRequired => "psk_required",
            Self::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub reason: ErrorReason,
    #[serde(default)]
    pub message: String,
    /// Parameters the Receiver saw in the HELLO it rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared: Option<HandshakeParams>,
}

/// DATA in PLAINTEXT mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaintextRecord {
    pub text: String,
}

/// DATA in AES_GCM and DIFFIE_HELLMAN modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcmRecord {
    pub seq: u64,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub tag: Vec<u8>,
}

/// DATA in AES_CBC_HMAC mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CbcHmacRecord {
    pub seq: u64,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub mac: Vec<u8>,
}
