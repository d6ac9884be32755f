//! Sender (initiator) role.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{default_port, HandshakeStatus};
use crate::crypto::seal::SealingContext;
use crate::error::{Error, SessionError};
use crate::event::EventSink;
use crate::frame::codec::{self, FrameReader, FrameWriter};
use crate::frame::{Frame, FrameType};
use crate::session::channel::Message;
use crate::session::{handshake, HandshakeParams, SecurityConfig, SessionConfig};
use crate::transport::tcp;

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Where to connect and with which modes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderConfig {
    #[serde(default = "localhost")]
    pub target_ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(flatten)]
    pub security: SecurityConfig,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            target_ip: localhost(),
            port: default_port(),
            security: SecurityConfig::default(),
        }
    }
}

impl SenderConfig {
    pub fn new(target: SocketAddr, security: SecurityConfig) -> Self {
        Self {
            target_ip: target.ip(),
            port: target.port(),
            security,
        }
    }

    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.target_ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Handshaking => "HANDSHAKING",
            Self::Ready => "READY",
        })
    }
}

/// An established session.
struct Connection {
    writer: FrameWriter<OwnedWriteHalf>,
    sealer: SealingContext,
    params: HandshakeParams,
    reader: JoinHandle<()>,
}

/// Result of a successful connect + handshake, before the read loop starts.
struct Link {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    sealer: SealingContext,
    params: HandshakeParams,
}

/// Connects to a Receiver (or a relay posing as one) and sends messages.
///
/// One connection at a time; `connect` replaces any existing one. Failures
/// leave the Sender in `Disconnected`, ready for another attempt.
pub struct Sender {
    config: SenderConfig,
    session: SessionConfig,
    events: EventSink,
    state: Arc<watch::Sender<SenderState>>,
    conn: Option<Connection>,
}

impl Sender {
    pub fn new(config: SenderConfig, session: SessionConfig, events: EventSink) -> Self {
        let (state, _) = watch::channel(SenderState::Disconnected);
        Self {
            config,
            session,
            events,
            state: Arc::new(state),
            conn: None,
        }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn state(&self) -> SenderState {
        match &self.conn {
            Some(conn) if conn.reader.is_finished() => SenderState::Disconnected,
            _ => *self.state.borrow(),
        }
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SenderState> {
        self.state.subscribe()
    }

    /// Parameters of the live session, if any.
    pub fn params(&self) -> Option<HandshakeParams> {
        match self.state() {
            SenderState::Ready => self.conn.as_ref().map(|c| c.params),
            _ => None,
        }
    }

    /// Connect and run the handshake, optionally replacing the configuration
    /// first. A previous connection is closed before dialing.
    pub async fn connect(&mut self, overrides: Option<SenderConfig>) -> Result<(), Error> {
        if let Some(config) = overrides {
            self.config = config;
        }
        self.teardown().await;

        let target = self.config.target();
        self.state.send_replace(SenderState::Connecting);
        self.events.status(format!("connecting to {target}"));

        let mut backoff = self.session.retry_policy.as_ref().map(|p| p.backoff());
        let result = loop {
            let attempt = establish(
                target,
                &self.config.security,
                &self.session,
                &self.state,
                &self.events,
            )
            .await;
            let e = match attempt {
                Ok(link) => break Ok(link),
                Err(e) if e.is_transient() => e,
                Err(e) => break Err(e),
            };
            let Some(delay) = backoff.as_mut().and_then(Iterator::next) else {
                break Err(e);
            };
            self.state.send_replace(SenderState::Connecting);
            self.events.log(format!(
                "connect to {target} failed: {e}; retry {} in {}ms",
                backoff.as_ref().map_or(0, |b| b.retries()),
                delay.as_millis()
            ));
            tokio::time::sleep(delay).await;
        };

        match result {
            Ok(link) => {
                self.state.send_replace(SenderState::Ready);
                let reader = tokio::spawn(read_loop(
                    link.reader,
                    self.events.clone(),
                    Arc::clone(&self.state),
                ));
                self.events.status(match link.params.enc_mode.is_encrypted() {
                    true => format!("handshake complete - encrypted ({})", link.params),
                    false => format!("handshake complete - plaintext ({})", link.params),
                });
                self.conn = Some(Connection {
                    writer: link.writer,
                    sealer: link.sealer,
                    params: link.params,
                    reader,
                });
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(SenderState::Disconnected);
                self.events.error(format!("failed to connect to {target}: {e}"));
                Err(e)
            }
        }
    }

    /// Seal and send one message.
    ///
    /// Outside `Ready` an error event is emitted and `NotEstablished` is
    /// returned; nothing is written.
    pub async fn send_message(&mut self, text: &str) -> Result<(), Error> {
        let ready = self.state() == SenderState::Ready;
        let conn = match self.conn.as_mut() {
            Some(conn) if ready => conn,
            _ => {
                self.events.error("handshake not complete, not ready to send");
                return Err(SessionError::NotEstablished.into());
            }
        };

        let result = match conn.sealer.seal(text) {
            Ok(payload) => conn
                .writer
                .send(Frame::new(FrameType::Data, payload))
                .await
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.events.message_sent(text);
                Ok(())
            }
            Err(e) => {
                self.events.error(format!("send failed: {e}"));
                self.teardown().await;
                Err(e)
            }
        }
    }

    pub fn check_handshake(&self) -> HandshakeStatus {
        match self.state() {
            SenderState::Ready => {
                let encrypted = self.params().is_some_and(|p| p.enc_mode.is_encrypted());
                HandshakeStatus::new(
                    true,
                    if encrypted {
                        "Handshake complete - encrypted"
                    } else {
                        "Handshake complete - plaintext"
                    },
                )
            }
            SenderState::Connecting => HandshakeStatus::new(false, "Connecting..."),
            SenderState::Handshaking => HandshakeStatus::new(false, "Handshake in progress..."),
            SenderState::Disconnected => HandshakeStatus::new(false, "Not connected"),
        }
    }

    /// Send CLOSE and drop the connection.
    pub async fn stop(&mut self) {
        self.teardown().await;
        self.events.log("sender stopped and socket closed");
    }

    async fn teardown(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if !conn.reader.is_finished() {
            if let Err(e) = conn.writer.send(Frame::close()).await {
                tracing::debug!(error = %e, "failed to send CLOSE");
            }
        }
        let _ = conn.writer.close().await;
        conn.reader.abort();
        let _ = conn.reader.await;
        self.state.send_replace(SenderState::Disconnected);
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if let Some(conn) = &self.conn {
            conn.reader.abort();
        }
    }
}

async fn establish(
    target: SocketAddr,
    security: &SecurityConfig,
    session: &SessionConfig,
    state: &watch::Sender<SenderState>,
    events: &EventSink,
) -> Result<Link, Error> {
    let stream = tcp::connect_timeout(target, session.connect_timeout).await?;
    state.send_replace(SenderState::Handshaking);
    events.log(format!("connected to {target}, starting handshake"));

    let (read_half, write_half) = stream.into_split();
    let mut reader = codec::decode(read_half);
    let mut writer = codec::writer(write_half);

    let outcome = tokio::time::timeout(
        session.handshake_timeout,
        handshake::initiate(&mut reader, &mut writer, security),
    )
    .await
    .map_err(|_| SessionError::Timeout)??;

    let sealer = SealingContext::new(outcome.params.enc_mode, &outcome.keys)?;
    Ok(Link {
        reader,
        writer,
        sealer,
        params: outcome.params,
    })
}

/// Drain frames from the Receiver until it closes.
async fn read_loop(
    mut reader: FrameReader<OwnedReadHalf>,
    events: EventSink,
    state: Arc<watch::Sender<SenderState>>,
) {
    while let Some(next) = reader.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                events.error(format!("background receive error: {e}"));
                break;
            }
        };
        match Message::from_frame(frame) {
            Message::Data(payload) => {
                events.log(format!("DATA from receiver: {}", String::from_utf8_lossy(&payload)));
            }
            Message::Error(err) => {
                events.error(format!("error from receiver ({}): {}", err.reason, err.message));
            }
            Message::Close => {
                events.log("receiver closed the connection");
                break;
            }
            Message::Unexpected(frame_type) => {
                tracing::debug!(%frame_type, "ignoring frame after handshake");
            }
        }
    }
    state.send_replace(SenderState::Disconnected);
    events.status("disconnected");
}
