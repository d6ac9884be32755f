pub mod channel;
pub mod handshake;
pub mod retry;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, HandshakeError, SessionError};

use self::retry::RetryPolicy;

/// Encryption applied to DATA frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum EncMode {
    #[default]
    Plaintext = 0,
    AesGcm = 1,
    AesCbcHmac = 2,
    /// AES-256-GCM keyed from a Diffie-Hellman shared secret.
    DiffieHellman = 3,
}

impl EncMode {
    pub const ALL: [EncMode; 4] = [
        Self::Plaintext,
        Self::AesGcm,
        Self::AesCbcHmac,
        Self::DiffieHellman,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::AesGcm => "AES_GCM",
            Self::AesCbcHmac => "AES_CBC_HMAC",
            Self::DiffieHellman => "DIFFIE_HELLMAN",
        }
    }

    pub const fn is_encrypted(self) -> bool {
        !matches!(self, Self::Plaintext)
    }
}

impl From<EncMode> for u8 {
    fn from(mode: EncMode) -> Self {
        mode as u8
    }
}

impl TryFrom<u8> for EncMode {
    type Error = HandshakeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Plaintext),
            1 => Ok(Self::AesGcm),
            2 => Ok(Self::AesCbcHmac),
            3 => Ok(Self::DiffieHellman),
            other => Err(HandshakeError::UnknownEncMode(other)),
        }
    }
}

impl fmt::Display for EncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "0" | "plaintext" | "plain" => Ok(Self::Plaintext),
            "1" | "aesgcm" | "gcm" => Ok(Self::AesGcm),
            "2" | "aescbchmac" | "cbchmac" | "cbc" => Ok(Self::AesCbcHmac),
            "3" | "diffiehellman" | "dh" => Ok(Self::DiffieHellman),
            _ => Err(SessionError::InvalidConfig(format!("unknown encryption mode: {s}")).into()),
        }
    }
}

/// How session key material is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KxMode {
    #[default]
    Psk,
    Rsa,
    Dh,
}

impl KxMode {
    pub const ALL: [KxMode; 3] = [Self::Psk, Self::Rsa, Self::Dh];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Psk => "psk",
            Self::Rsa => "rsa",
            Self::Dh => "dh",
        }
    }
}

impl fmt::Display for KxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KxMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "psk" => Ok(Self::Psk),
            "rsa" => Ok(Self::Rsa),
            "dh" => Ok(Self::Dh),
            _ => Err(HandshakeError::UnknownKxMode(s.to_string()).into()),
        }
    }
}

/// The pair of modes pinned for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    pub enc_mode: EncMode,
    pub kx_mode: KxMode,
}

impl HandshakeParams {
    pub const fn new(enc_mode: EncMode, kx_mode: KxMode) -> Self {
        Self { enc_mode, kx_mode }
    }
}

impl fmt::Display for HandshakeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.enc_mode, self.kx_mode)
    }
}

/// Pre-shared key. Zeroed on drop and never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct Psk(Zeroizing<Vec<u8>>);

impl Psk {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Psk {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<&str> for Psk {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for Psk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Psk({} bytes)", self.0.len())
    }
}

/// Modes and secrets a role is pinned to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    pub enc_mode: EncMode,
    pub kx_mode: KxMode,
    pub psk: Option<Psk>,
    pub demo_mode: bool,
}

impl SecurityConfig {
    pub fn builder() -> SecurityConfigBuilder {
        SecurityConfigBuilder::default()
    }

    pub fn params(&self) -> HandshakeParams {
        HandshakeParams::new(self.enc_mode, self.kx_mode)
    }

    /// A usable PSK, if one is configured. Empty keys count as absent.
    pub fn psk(&self) -> Option<&Psk> {
        self.psk.as_ref().filter(|p| !p.is_empty())
    }

    /// True when the configuration cannot work without a PSK.
    pub fn missing_psk(&self) -> bool {
        self.kx_mode == KxMode::Psk && self.enc_mode.is_encrypted() && self.psk().is_none()
    }
}

/// Builder for [`SecurityConfig`].
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    inner: SecurityConfig,
}

impl SecurityConfigBuilder {
    pub fn enc_mode(mut self, mode: EncMode) -> Self {
        self.inner.enc_mode = mode;
        self
    }

    pub fn kx_mode(mut self, mode: KxMode) -> Self {
        self.inner.kx_mode = mode;
        self
    }

    pub fn psk(mut self, psk: impl Into<Psk>) -> Self {
        self.inner.psk = Some(psk.into());
        self
    }

    pub fn demo_mode(mut self, demo: bool) -> Self {
        self.inner.demo_mode = demo;
        self
    }

    pub fn build(self) -> SecurityConfig {
        self.inner
    }
}

/// Timing and retry configuration shared by all roles.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum time allowed for the handshake to complete (default: 30s).
    pub handshake_timeout: Duration,

    /// Bound on a single outbound TCP connect (default: 10s).
    pub connect_timeout: Duration,

    /// Pause before the Attacker redials an unreachable Receiver (default: 1s).
    pub reconnect_delay: Duration,

    /// Optional retry policy for Sender connection attempts.
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            retry_policy: None,
        }
    }
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    handshake_timeout: Duration,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    retry_policy: Option<RetryPolicy>,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            handshake_timeout: defaults.handshake_timeout,
            connect_timeout: defaults.connect_timeout,
            reconnect_delay: defaults.reconnect_delay,
            retry_policy: None,
        }
    }
}

impl SessionConfigBuilder {
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Build the `SessionConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<SessionConfig, Error> {
        if self.handshake_timeout.is_zero() {
            return Err(SessionError::InvalidConfig("handshake_timeout must be > 0".into()).into());
        }
        if self.connect_timeout.is_zero() {
            return Err(SessionError::InvalidConfig("connect_timeout must be > 0".into()).into());
        }
        if let Some(policy) = &self.retry_policy {
            policy.validate()?;
        }
        Ok(SessionConfig {
            handshake_timeout: self.handshake_timeout,
            connect_timeout: self.connect_timeout,
            reconnect_delay: self.reconnect_delay,
            retry_policy: self.retry_policy,
        })
    }
}
