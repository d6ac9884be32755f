//! Receiver (responder) role: a single-connection listener.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{default_port, HandshakeStatus};
use crate::crypto::seal::OpeningContext;
use crate::error::{DataError, Error, SessionError};
use crate::event::EventSink;
use crate::frame::codec;
use crate::session::channel::Message;
use crate::session::{handshake, EncMode, HandshakeParams, SecurityConfig, SessionConfig};
use crate::transport::tcp;

fn any_interface() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverConfig {
    #[serde(default = "any_interface")]
    pub bind_ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(flatten)]
    pub security: SecurityConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_ip: any_interface(),
            port: default_port(),
            security: SecurityConfig::default(),
        }
    }
}

impl ReceiverConfig {
    pub fn new(bind: SocketAddr, security: SecurityConfig) -> Self {
        Self {
            bind_ip: bind.ip(),
            port: bind.port(),
            security,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Listening,
    Handshaking {
        peer: SocketAddr,
    },
    Ready {
        peer: SocketAddr,
        params: HandshakeParams,
    },
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening => f.write_str("LISTENING"),
            Self::Handshaking { peer } => write!(f, "HANDSHAKING({peer})"),
            Self::Ready { peer, .. } => write!(f, "READY({peer})"),
        }
    }
}

enum Command {
    UpdateSecurity(SecurityConfig),
}

/// Listens for Senders and decrypts their messages.
///
/// At most one connection is served; others are closed as soon as they are
/// accepted. The listener survives connection failures.
pub struct Receiver {
    local_addr: SocketAddr,
    state: watch::Receiver<ReceiverState>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Bind the listener and start accepting connections.
    pub async fn bind(
        config: ReceiverConfig,
        session: SessionConfig,
        events: EventSink,
    ) -> Result<Self, Error> {
        let listener = tcp::listen(config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        events.status(format!("receiver listening on {local_addr}"));

        let (state_tx, state) = watch::channel(ReceiverState::Listening);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(accept_loop(AcceptLoop {
            listener,
            security: config.security,
            session,
            events,
            state: Arc::new(state_tx),
            commands: command_rx,
            shutdown: shutdown.clone(),
        }));

        Ok(Self {
            local_addr,
            state,
            commands,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ReceiverState> {
        self.state.clone()
    }

    pub fn check_handshake(&self) -> HandshakeStatus {
        match self.state() {
            ReceiverState::Ready { params, .. } if params.enc_mode.is_encrypted() => {
                HandshakeStatus::new(true, "Handshake complete - encrypted")
            }
            ReceiverState::Ready { .. } => HandshakeStatus::new(true, "Handshake complete - plaintext"),
            ReceiverState::Handshaking { .. } => HandshakeStatus::new(false, "Handshake in progress..."),
            ReceiverState::Listening => HandshakeStatus::new(false, "Waiting for connection..."),
        }
    }

    /// Replace the security configuration for future connections.
    ///
    /// The current connection, if any, is terminated.
    pub fn update_security_config(&self, security: SecurityConfig) -> Result<(), Error> {
        self.commands
            .send(Command::UpdateSecurity(security))
            .map_err(|_| SessionError::Closed)?;
        Ok(())
    }

    /// Close the active connection and the listener.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct AcceptLoop {
    listener: TcpListener,
    security: SecurityConfig,
    session: SessionConfig,
    events: EventSink,
    state: Arc<watch::Sender<ReceiverState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
}

async fn accept_loop(mut ctx: AcceptLoop) {
    let mut active: Option<(CancellationToken, JoinHandle<()>)> = None;

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            Some(command) = ctx.commands.recv() => match command {
                Command::UpdateSecurity(security) => {
                    ctx.events.log(format!("security config updated to {}", security.params()));
                    ctx.security = security;
                    if let Some((token, task)) = active.take() {
                        token.cancel();
                        let _ = task.await;
                    }
                }
            },
            accepted = tcp::accept(&ctx.listener) => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        ctx.events.error(format!("accept failed: {e}"));
                        continue;
                    }
                };
                // Only a connection that reached its end restores `Listening`.
                if *ctx.state.borrow() != ReceiverState::Listening {
                    ctx.events.log(format!("refusing connection from {peer}: already serving a sender"));
                    drop(stream);
                    continue;
                }
                ctx.state.send_replace(ReceiverState::Handshaking { peer });
                let token = ctx.shutdown.child_token();
                let task = tokio::spawn(serve_connection(
                    stream,
                    peer,
                    ctx.security.clone(),
                    ctx.session.clone(),
                    ctx.events.clone(),
                    Arc::clone(&ctx.state),
                    token.clone(),
                ));
                active = Some((token, task));
            }
        }
    }

    if let Some((token, task)) = active.take() {
        token.cancel();
        let _ = task.await;
    }
    ctx.events.log("receiver stopped and sockets closed");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    security: SecurityConfig,
    session: SessionConfig,
    events: EventSink,
    state: Arc<watch::Sender<ReceiverState>>,
    cancel: CancellationToken,
) {
    events.log(format!("client {peer} connected, starting handshake"));

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            events.log(format!("connection with {peer} terminated"));
            Ok(())
        }
        result = run_connection(stream, peer, &security, &session, &events, &state) => result,
    };
    if let Err(e) = result {
        events.error(format!("connection error: {e}"));
    }

    state.send_replace(ReceiverState::Listening);
    events.status("listening");
}

async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    security: &SecurityConfig,
    session: &SessionConfig,
    events: &EventSink,
    state: &watch::Sender<ReceiverState>,
) -> Result<(), Error> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = codec::decode(read_half);
    let mut writer = codec::writer(write_half);

    let outcome = tokio::time::timeout(
        session.handshake_timeout,
        handshake::respond(&mut reader, &mut writer, security),
    )
    .await
    .map_err(|_| SessionError::Timeout)??;

    let mut opener = OpeningContext::new(outcome.params.enc_mode, &outcome.keys)?;
    state.send_replace(ReceiverState::Ready {
        peer,
        params: outcome.params,
    });
    events.status(format!("handshake complete with {peer} ({})", outcome.params));

    while let Some(next) = reader.next().await {
        match Message::from_frame(next?) {
            Message::Data(payload) => {
                // Per-message failures are reported and the connection stays up.
                let _ = process_data_frame(&mut opener, &payload, events);
            }
            Message::Close => {
                events.log("peer closed connection");
                break;
            }
            Message::Error(err) => {
                events.error(format!("error from peer ({}): {}", err.reason, err.message));
            }
            Message::Unexpected(frame_type) => {
                tracing::debug!(%frame_type, "ignoring frame after handshake");
            }
        }
    }
    Ok(())
}

/// Open one DATA payload and report the outcome.
///
/// Replays and integrity failures emit their own events and leave the
/// opener's sequence state untouched.
pub fn process_data_frame(
    opener: &mut OpeningContext,
    payload: &[u8],
    events: &EventSink,
) -> Result<String, DataError> {
    match opener.open(payload) {
        Ok(text) => {
            events.log(format!("RECV ({}): {text}", opener.mode()));
            events.message_received(text.clone());
            if opener.mode() == EncMode::Plaintext && looks_tampered(&text) {
                events.attack_success(format!("message was modified by attacker: \"{text}\""));
            }
            Ok(text)
        }
        Err(e @ DataError::Replay { received, last }) => {
            events.replay_rejected(received, last);
            events.attack_failed(format!("replay attack detected and blocked (seq {received})"));
            Err(e)
        }
        Err(e @ DataError::Crypto(_)) => {
            events.integrity_failure(format!("integrity check failed ({}): {e}", opener.mode()));
            events.attack_failed(format!("tampering detected ({})", opener.mode()));
            Err(e)
        }
        Err(e @ DataError::Malformed(_)) => {
            events.error(e.to_string());
            Err(e)
        }
    }
}

/// Display heuristic for plaintext that an attacker has visibly rewritten.
pub fn looks_tampered(text: &str) -> bool {
    text.contains("[MITM modified]")
        || text.contains("HACKED")
        || text.to_ascii_lowercase().contains("mitm")
}
