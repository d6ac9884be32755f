//! Attack configuration for the MITM relay.

pub mod tamper;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, SessionError};

pub use tamper::{AppliedAttack, AttackReport, Tamperer, Verdict};

/// Text substituted into plaintext DATA frames when none is configured.
pub const DEFAULT_MODIFY_TEXT: &str = "[MITM modified]";

/// Default port of the Receiver the relay dials.
pub const DEFAULT_VICTIM_PORT: u16 = 12347;

/// Transform applied to Sender-to-Receiver frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackMode {
    /// Forward unchanged, surfacing plaintext where visible.
    #[default]
    Passive,
    /// Rewrite the text of plaintext DATA frames.
    Modify,
    /// Discard frames with probability `drop_rate` percent.
    Drop,
    /// Stall each frame for `delay_ms`.
    Delay,
    /// Substitute the previously observed DATA frame.
    Replay,
    /// Force `encMode` to PLAINTEXT in the HELLO.
    Downgrade,
}

impl AttackMode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Modify => "modify",
            Self::Drop => "drop",
            Self::Delay => "delay",
            Self::Replay => "replay",
            Self::Downgrade => "downgrade",
        }
    }
}

impl fmt::Display for AttackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttackMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passive" => Ok(Self::Passive),
            "modify" => Ok(Self::Modify),
            "drop" => Ok(Self::Drop),
            "delay" => Ok(Self::Delay),
            "replay" => Ok(Self::Replay),
            "downgrade" => Ok(Self::Downgrade),
            _ => Err(SessionError::InvalidConfig(format!("unknown attack mode: {s}")).into()),
        }
    }
}

/// Runtime-mutable attack settings, read by the relay for every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttackConfig {
    #[serde(alias = "attackMode")]
    pub mode: AttackMode,
    /// When false every mode behaves as `passive`.
    pub active: bool,
    /// Drop probability in percent, `0.0..=100.0`.
    pub drop_rate: f64,
    pub delay_ms: u64,
    pub modify_text: String,
    pub victim_ip: IpAddr,
    pub victim_port: u16,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            mode: AttackMode::Passive,
            active: true,
            drop_rate: 0.0,
            delay_ms: 0,
            modify_text: DEFAULT_MODIFY_TEXT.to_string(),
            victim_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            victim_port: DEFAULT_VICTIM_PORT,
        }
    }
}

impl AttackConfig {
    pub fn victim(&self) -> SocketAddr {
        SocketAddr::new(self.victim_ip, self.victim_port)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Replacement text, falling back to the default when blank.
    pub fn modify_text(&self) -> &str {
        match self.modify_text.trim() {
            "" => DEFAULT_MODIFY_TEXT,
            text => text,
        }
    }

    /// The mode actually in force.
    pub fn effective_mode(&self) -> AttackMode {
        if self.active {
            self.mode
        } else {
            AttackMode::Passive
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=100.0).contains(&self.drop_rate) {
            return Err(SessionError::InvalidConfig(format!(
                "dropRate must be within 0..=100, got {}",
                self.drop_rate
            ))
            .into());
        }
        if self.victim_port == 0 {
            return Err(SessionError::InvalidConfig("victimPort must be non-zero".into()).into());
        }
        Ok(())
    }
}
