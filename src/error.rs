use std::io;
use std::net::SocketAddr;

use crate::event::Role;
use crate::frame::payload::ErrorReason;
use crate::session::HandshakeParams;

/// Errors from frame parsing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("oversized frame: declared length {declared} exceeds maximum {max}")]
    OversizedFrame { declared: usize, max: usize },

    #[error("empty frame: declared length is zero")]
    EmptyFrame,

    #[error("unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("AEAD authentication failed: ciphertext or tag was tampered")]
    AuthenticationFailed,

    #[error("MAC verification failed")]
    MacVerificationFailed,

    #[error("decryption failed: invalid padding")]
    DecryptionFailed,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("RSA operation failed: {0}")]
    Rsa(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid Diffie-Hellman public value")]
    InvalidDhPublicKey,

    #[error("no key material available for an encrypting mode")]
    MissingKeyMaterial,

    #[error("sequence overflow: maximum sequence number reached")]
    SequenceOverflow,
}

/// Errors that abort a handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame {
        expected: &'static str,
        actual: String,
    },

    #[error("downgrade detected: sent {sent}, peer negotiated {received}")]
    DowngradeDetected {
        sent: HandshakeParams,
        received: HandshakeParams,
    },

    #[error("mode mismatch: configured {expected}, peer declared {declared}")]
    ModeMismatch {
        expected: HandshakeParams,
        declared: HandshakeParams,
    },

    #[error("pre-shared key required but not configured")]
    PskRequired,

    #[error("rejected by peer ({reason}): {message}")]
    Rejected {
        reason: ErrorReason,
        message: String,
    },

    #[error("malformed handshake payload: {0}")]
    Malformed(String),

    #[error("missing field in handshake payload: {0}")]
    MissingField(&'static str),

    #[error("unknown encryption mode: {0}")]
    UnknownEncMode(u8),

    #[error("unknown key exchange mode: {0}")]
    UnknownKxMode(String),

    #[error("connection closed during handshake")]
    Closed,
}

/// Per-message failures on the data channel.
///
/// None of these end the connection; the offending message is discarded.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("replayed sequence number: received {received}, last accepted {last}")]
    Replay { received: u64, last: u64 },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("malformed DATA payload: {0}")]
    Malformed(String),
}

/// Errors from role and session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not established")]
    NotEstablished,

    #[error("session closed")]
    Closed,

    #[error("handshake timeout")]
    Timeout,

    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),

    #[error("operation requires the {expected} role (current: {})", .actual.map_or("none".to_string(), |r| r.to_string()))]
    WrongRole {
        expected: Role,
        actual: Option<Role>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Failures a later attempt might not hit: the peer was unreachable,
    /// slow, or hung up. A peer that answered and said no is not transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Frame(FrameError::Io(_))
                | Error::Handshake(HandshakeError::Closed)
                | Error::Session(SessionError::Timeout | SessionError::ConnectTimeout(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
