//! Structured events emitted by the roles for an attached observer.
//!
//! Every event is also logged through `tracing`, so a sink without a
//! receiver still leaves a trace in the logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The three protocol participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
    Attacker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
            Self::Attacker => "attacker",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Log { message: String },
    Status { status: String },
    Error { error: String },
    MessageSent { text: String },
    MessageReceived { text: String },
    ReplayRejected { seq: u64, last: u64 },
    IntegrityFailure { message: String },
    AttackSuccess { message: String },
    AttackFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub role: Role,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Cloneable handle that stamps events with a role and forwards them.
#[derive(Debug, Clone)]
pub struct EventSink {
    role: Role,
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    pub fn new(role: Role, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { role, tx: Some(tx) }
    }

    /// A sink that only logs.
    pub fn disabled(role: Role) -> Self {
        Self { role, tx: None }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(role = %self.role, "{message}");
        self.emit(EventKind::Log { message });
    }

    pub fn status(&self, status: impl Into<String>) {
        let status = status.into();
        tracing::info!(role = %self.role, %status, "status changed");
        self.emit(EventKind::Status { status });
    }

    pub fn error(&self, error: impl Into<String>) {
        let error = error.into();
        tracing::warn!(role = %self.role, "{error}");
        self.emit(EventKind::Error { error });
    }

    pub fn message_sent(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(role = %self.role, len = text.len(), "message sent");
        self.emit(EventKind::MessageSent { text });
    }

    pub fn message_received(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(role = %self.role, len = text.len(), "message received");
        self.emit(EventKind::MessageReceived { text });
    }

    pub fn replay_rejected(&self, seq: u64, last: u64) {
        tracing::warn!(role = %self.role, seq, last, "replayed DATA frame rejected");
        self.emit(EventKind::ReplayRejected { seq, last });
    }

    pub fn integrity_failure(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(role = %self.role, "{message}");
        self.emit(EventKind::IntegrityFailure { message });
    }

    pub fn attack_success(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(role = %self.role, "{message}");
        self.emit(EventKind::AttackSuccess { message });
    }

    pub fn attack_failed(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(role = %self.role, "{message}");
        self.emit(EventKind::AttackFailed { message });
    }

    fn emit(&self, kind: EventKind) {
        if let Some(tx) = &self.tx {
            // A dropped observer is not an error for the protocol.
            let _ = tx.send(Event {
                role: self.role,
                kind,
            });
        }
    }
}
