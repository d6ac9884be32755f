//! Single entry point driving whichever role this process plays.

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::attack::AttackConfig;
use crate::error::{Error, SessionError};
use crate::event::{Event, EventSink, Role};
use crate::roles::{
    Attacker, AttackerConfig, HandshakeStatus, Receiver, ReceiverConfig, Sender, SenderConfig,
};
use crate::session::{SecurityConfig, SessionConfig};

/// Role selection as sent by a control client:
/// `{"role": "sender", "config": {...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "role", content = "config", rename_all = "lowercase")]
pub enum RoleConfig {
    Sender(SenderConfig),
    Receiver(ReceiverConfig),
    Attacker(AttackerConfig),
}

impl RoleConfig {
    pub fn role(&self) -> Role {
        match self {
            Self::Sender(_) => Role::Sender,
            Self::Receiver(_) => Role::Receiver,
            Self::Attacker(_) => Role::Attacker,
        }
    }
}

enum ActiveRole {
    Sender(Sender),
    Receiver(Receiver),
    Attacker(Attacker),
}

impl ActiveRole {
    fn role(&self) -> Role {
        match self {
            Self::Sender(_) => Role::Sender,
            Self::Receiver(_) => Role::Receiver,
            Self::Attacker(_) => Role::Attacker,
        }
    }
}

/// Owns at most one role at a time and routes commands to it.
///
/// Operations aimed at a role other than the configured one fail with
/// [`SessionError::WrongRole`].
pub struct Controller {
    session: SessionConfig,
    events: mpsc::UnboundedSender<Event>,
    active: Option<ActiveRole>,
}

impl Controller {
    pub fn new(session: SessionConfig, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            session,
            events,
            active: None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.active.as_ref().map(ActiveRole::role)
    }

    fn sink(&self, role: Role) -> EventSink {
        EventSink::new(role, self.events.clone())
    }

    fn wrong_role(&self, expected: Role) -> Error {
        SessionError::WrongRole {
            expected,
            actual: self.role(),
        }
        .into()
    }

    /// Stop the current role, if any, and start the requested one.
    ///
    /// Receivers and Attackers bind their listener immediately; a Sender
    /// waits for [`connect`](Self::connect).
    pub async fn configure_role(&mut self, config: RoleConfig) -> Result<(), Error> {
        self.stop().await;
        let role = config.role();
        tracing::info!(%role, "configuring role");

        let active = match config {
            RoleConfig::Sender(config) => {
                let sender = Sender::new(config, self.session.clone(), self.sink(role));
                self.sink(role).status("sender configured, ready to connect");
                ActiveRole::Sender(sender)
            }
            RoleConfig::Receiver(config) => ActiveRole::Receiver(
                Receiver::bind(config, self.session.clone(), self.sink(role)).await?,
            ),
            RoleConfig::Attacker(config) => ActiveRole::Attacker(
                Attacker::bind(config, self.session.clone(), self.sink(role)).await?,
            ),
        };
        self.active = Some(active);
        Ok(())
    }

    pub async fn connect(&mut self, overrides: Option<SenderConfig>) -> Result<(), Error> {
        match &mut self.active {
            Some(ActiveRole::Sender(sender)) => sender.connect(overrides).await,
            _ => Err(self.wrong_role(Role::Sender)),
        }
    }

    pub async fn send_message(&mut self, text: &str) -> Result<(), Error> {
        match &mut self.active {
            Some(ActiveRole::Sender(sender)) => sender.send_message(text).await,
            _ => Err(self.wrong_role(Role::Sender)),
        }
    }

    pub fn check_handshake(&self) -> HandshakeStatus {
        match &self.active {
            Some(ActiveRole::Sender(sender)) => sender.check_handshake(),
            Some(ActiveRole::Receiver(receiver)) => receiver.check_handshake(),
            Some(ActiveRole::Attacker(attacker)) => attacker.check_handshake(),
            None => HandshakeStatus::new(false, "No role configured"),
        }
    }

    pub fn update_security_config(&self, security: SecurityConfig) -> Result<(), Error> {
        match &self.active {
            Some(ActiveRole::Receiver(receiver)) => receiver.update_security_config(security),
            _ => Err(self.wrong_role(Role::Receiver)),
        }
    }

    pub fn start_attack(&self, config: Option<AttackConfig>) -> Result<(), Error> {
        self.attacker()?.start_attack(config)
    }

    pub fn update_attack_config(&self, config: AttackConfig) -> Result<(), Error> {
        self.attacker()?.update_attack_config(config)
    }

    pub fn stop_attack(&self) -> Result<(), Error> {
        self.attacker()?.stop_attack();
        Ok(())
    }

    pub fn attack_config(&self) -> Result<AttackConfig, Error> {
        Ok(self.attacker()?.attack_config())
    }

    fn attacker(&self) -> Result<&Attacker, Error> {
        match &self.active {
            Some(ActiveRole::Attacker(attacker)) => Ok(attacker),
            _ => Err(self.wrong_role(Role::Attacker)),
        }
    }

    /// Stop the configured role. Idempotent.
    pub async fn stop(&mut self) {
        match self.active.take() {
            Some(ActiveRole::Sender(mut sender)) => sender.stop().await,
            Some(ActiveRole::Receiver(mut receiver)) => receiver.stop().await,
            Some(ActiveRole::Attacker(mut attacker)) => attacker.stop().await,
            None => {}
        }
    }
}
