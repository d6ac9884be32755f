//! The three protocol participants.

pub mod attacker;
pub mod receiver;
pub mod sender;

use serde::Serialize;

pub use attacker::{Attacker, AttackerConfig, RelayState};
pub use receiver::{Receiver, ReceiverConfig, ReceiverState};
pub use sender::{Sender, SenderConfig, SenderState};

/// Port every role uses unless configured otherwise.
pub const DEFAULT_PORT: u16 = 12347;

pub(crate) fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Answer to a `checkHandshake` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeStatus {
    pub complete: bool,
    pub status: String,
}

impl HandshakeStatus {
    pub fn new(complete: bool, status: impl Into<String>) -> Self {
        Self {
            complete,
            status: status.into(),
        }
    }
}
