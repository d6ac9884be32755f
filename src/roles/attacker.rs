//! Attacker role: a man-in-the-middle frame relay.
//!
//! The relay accepts a Sender, dials the real Receiver (the "victim") and
//! forwards frames between them, applying the configured attack to the
//! Sender-to-Receiver direction. Frames arriving before the victim is
//! reachable are queued in order and flushed once it is.

use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{default_port, HandshakeStatus};
use crate::attack::{AppliedAttack, AttackConfig, AttackReport, Tamperer};
use crate::error::Error;
use crate::event::EventSink;
use crate::frame::codec::{self, FrameReader, FrameWriter};
use crate::frame::payload::ErrorReason;
use crate::frame::{Frame, FrameType};
use crate::session::channel::Message;
use crate::session::SessionConfig;
use crate::transport::tcp;

/// Bytes of raw payload shown in relay logs.
const LOG_PREFIX_LEN: usize = 32;

fn any_interface() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackerConfig {
    #[serde(default = "any_interface")]
    pub listen_ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(flatten)]
    pub attack: AttackConfig,
}

impl Default for AttackerConfig {
    fn default() -> Self {
        Self {
            listen_ip: any_interface(),
            port: default_port(),
            attack: AttackConfig::default(),
        }
    }
}

impl AttackerConfig {
    pub fn new(listen: SocketAddr, attack: AttackConfig) -> Self {
        Self {
            listen_ip: listen.ip(),
            port: listen.port(),
            attack,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Listening,
    SenderConnected,
    Buffering,
    ReceiverConnected,
    Relaying,
    TornDown,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Listening => "LISTENING",
            Self::SenderConnected => "SENDER_CONNECTED",
            Self::Buffering => "BUFFERING",
            Self::ReceiverConnected => "RECEIVER_CONNECTED",
            Self::Relaying => "RELAYING",
            Self::TornDown => "TORN_DOWN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    SenderToReceiver,
    ReceiverToSender,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SenderToReceiver => "sender->receiver",
            Self::ReceiverToSender => "receiver->sender",
        })
    }
}

/// Shared by the accept loop and each relay session.
#[derive(Clone)]
struct Relay {
    config: watch::Receiver<AttackConfig>,
    session: SessionConfig,
    events: EventSink,
    state: Arc<watch::Sender<RelayState>>,
}

/// Running MITM relay.
pub struct Attacker {
    local_addr: SocketAddr,
    config: watch::Sender<AttackConfig>,
    state: watch::Receiver<RelayState>,
    events: EventSink,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Attacker {
    /// Bind the Sender-facing listener and start relaying.
    pub async fn bind(
        config: AttackerConfig,
        session: SessionConfig,
        events: EventSink,
    ) -> Result<Self, Error> {
        config.attack.validate()?;
        let listener = tcp::listen(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        events.status(format!(
            "attacker listening on {local_addr}, forwarding to {}",
            config.attack.victim()
        ));

        let (config_tx, config_rx) = watch::channel(config.attack);
        let (state_tx, state) = watch::channel(RelayState::Listening);
        let shutdown = CancellationToken::new();

        let relay = Relay {
            config: config_rx,
            session,
            events: events.clone(),
            state: Arc::new(state_tx),
        };
        let task = tokio::spawn(accept_loop(listener, relay, shutdown.clone()));

        Ok(Self {
            local_addr,
            config: config_tx,
            state,
            events,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    pub fn attack_config(&self) -> AttackConfig {
        self.config.borrow().clone()
    }

    /// Replace the attack configuration; the next relayed frame sees it.
    pub fn update_attack_config(&self, config: AttackConfig) -> Result<(), Error> {
        config.validate()?;
        self.events.log(format!(
            "attack config updated: mode={} active={}",
            config.mode, config.active
        ));
        self.config.send_replace(config);
        Ok(())
    }

    /// Activate an attack, optionally replacing the configuration first.
    pub fn start_attack(&self, config: Option<AttackConfig>) -> Result<(), Error> {
        let mut config = config.unwrap_or_else(|| self.attack_config());
        config.active = true;
        self.update_attack_config(config)
    }

    /// Fall back to passive relaying without forgetting the configured mode.
    pub fn stop_attack(&self) {
        self.config.send_modify(|config| config.active = false);
        self.events.log("attack stopped, relaying passively");
    }

    pub fn check_handshake(&self) -> HandshakeStatus {
        match self.state() {
            RelayState::Relaying => {
                HandshakeStatus::new(true, "MITM relay active - connections established")
            }
            RelayState::SenderConnected | RelayState::Buffering | RelayState::ReceiverConnected => {
                HandshakeStatus::new(false, "Partial connection...")
            }
            RelayState::Listening | RelayState::TornDown => {
                HandshakeStatus::new(false, "Waiting for connections...")
            }
        }
    }

    /// Tear down both legs and close the listener.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Attacker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, relay: Relay, shutdown: CancellationToken) {
    let mut current: Option<(CancellationToken, JoinHandle<()>)> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = tcp::accept(&listener) => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        relay.events.error(format!("accept failed: {e}"));
                        continue;
                    }
                };
                // A new Sender preempts the previous session.
                if let Some((token, task)) = current.take() {
                    if !task.is_finished() {
                        relay.events.log("new sender connected, dropping previous session");
                    }
                    token.cancel();
                    let _ = task.await;
                }
                let token = shutdown.child_token();
                let task = tokio::spawn(relay_session(stream, peer, relay.clone(), token.clone()));
                current = Some((token, task));
            }
        }
    }

    if let Some((token, task)) = current.take() {
        token.cancel();
        let _ = task.await;
    }
    relay.state.send_replace(RelayState::TornDown);
    relay.events.log("attacker stopped and sockets closed");
}

async fn relay_session(stream: TcpStream, peer: SocketAddr, relay: Relay, cancel: CancellationToken) {
    relay.state.send_replace(RelayState::SenderConnected);
    relay.events.log(format!("sender {peer} connected to attacker"));

    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = run_session(stream, &relay) => result,
    };
    if let Err(e) = result {
        relay.events.error(format!("relay error: {e}"));
    }

    relay.state.send_replace(RelayState::TornDown);
    relay.events.status("relay torn down, waiting for sender");
}

async fn run_session(stream: TcpStream, relay: &Relay) -> Result<(), Error> {
    let (read_half, write_half) = stream.into_split();
    let mut from_sender = codec::decode(read_half);
    let to_sender = codec::writer(write_half);

    let Some((victim, mut queue)) = buffer_until_receiver(relay, &mut from_sender).await? else {
        relay.events.log("sender left before the receiver was reachable");
        return Ok(());
    };

    relay.state.send_replace(RelayState::ReceiverConnected);
    let victim_addr = victim.peer_addr()?;
    relay.events.status(format!(
        "MITM active: sender <-> attacker <-> receiver ({victim_addr})"
    ));

    let (read_half, write_half) = victim.into_split();
    let from_receiver = codec::decode(read_half);
    let mut to_receiver = codec::writer(write_half);

    let mut tamperer = Tamperer::new();
    let mut rng = StdRng::from_entropy();

    // Single flush-then-live transition.
    if !queue.is_empty() {
        relay.events.log(format!("flushing {} buffered frame(s)", queue.len()));
    }
    while let Some(frame) = queue.pop_front() {
        forward(relay, &mut tamperer, &mut rng, frame, &mut to_receiver).await?;
    }
    relay.state.send_replace(RelayState::Relaying);

    let (last_attack, attack_seen) = watch::channel(tamperer.last_applied());
    let upstream = pump_to_receiver(relay, from_sender, to_receiver, tamperer, rng, last_attack);
    let downstream = pump_to_sender(relay, from_receiver, to_sender, attack_seen);

    // Each leg is read on its own; whichever ends first ends the session.
    tokio::select! {
        result = upstream => result,
        result = downstream => result,
    }
}

async fn pump_to_receiver<R, W>(
    relay: &Relay,
    mut from_sender: FrameReader<R>,
    mut to_receiver: FrameWriter<W>,
    mut tamperer: Tamperer,
    mut rng: StdRng,
    last_attack: watch::Sender<Option<AppliedAttack>>,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = from_sender.next().await {
        forward(relay, &mut tamperer, &mut rng, frame?, &mut to_receiver).await?;
        last_attack.send_replace(tamperer.last_applied());
    }
    relay.events.log("sender disconnected");
    Ok(())
}

async fn pump_to_sender<R, W>(
    relay: &Relay,
    mut from_receiver: FrameReader<R>,
    mut to_sender: FrameWriter<W>,
    last_attack: watch::Receiver<Option<AppliedAttack>>,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = from_receiver.next().await {
        let frame = frame?;
        let attack = *last_attack.borrow();
        observe_receiver(relay, &frame, attack);
        to_sender.send(frame).await?;
    }
    relay.events.log("receiver disconnected");
    Ok(())
}

/// Queue Sender frames while dialing the victim.
///
/// Returns `None` if the Sender goes away first. Failed dials are retried
/// after `reconnect_delay` for as long as the Sender stays connected.
async fn buffer_until_receiver(
    relay: &Relay,
    from_sender: &mut FrameReader<OwnedReadHalf>,
) -> Result<Option<(TcpStream, VecDeque<Frame>)>, Error> {
    relay.state.send_replace(RelayState::Buffering);
    let mut queue = VecDeque::new();

    let mut victim = relay.config.borrow().victim();
    relay.events.log(format!("connecting to real receiver at {victim}"));
    let mut dial = Box::pin(dial_victim(victim, relay.session.connect_timeout, Duration::ZERO));

    loop {
        tokio::select! {
            next = from_sender.next() => match next {
                Some(frame) => {
                    let frame = frame?;
                    tracing::debug!(frame_type = %frame.frame_type, queued = queue.len() + 1, "buffering sender frame");
                    queue.push_back(frame);
                }
                None => return Ok(None),
            },
            connected = &mut dial => match connected {
                Ok(stream) => return Ok(Some((stream, queue))),
                Err(e) => {
                    let delay = relay.session.reconnect_delay;
                    relay.events.error(format!(
                        "failed to connect to receiver at {victim}: {e}; retrying in {}ms",
                        delay.as_millis()
                    ));
                    victim = relay.config.borrow().victim();
                    dial.set(dial_victim(victim, relay.session.connect_timeout, delay));
                }
            },
        }
    }
}

async fn dial_victim(
    addr: SocketAddr,
    timeout: Duration,
    delay: Duration,
) -> Result<TcpStream, Error> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    tcp::connect_timeout(addr, timeout).await
}

/// Apply the current attack to one Sender frame and pass on what remains.
async fn forward<W>(
    relay: &Relay,
    tamperer: &mut Tamperer,
    rng: &mut StdRng,
    frame: Frame,
    to_receiver: &mut FrameWriter<W>,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    log_frame(&relay.events, Direction::SenderToReceiver, &frame);
    let config = relay.config.borrow().clone();
    let verdict = tamperer.apply(&config, frame, rng);

    match verdict.report {
        Some(AttackReport::Success(message)) => relay.events.attack_success(message),
        Some(AttackReport::Failed(message)) => relay.events.attack_failed(message),
        Some(AttackReport::Observed(message)) => relay.events.log(message),
        None => {}
    }
    if let Some(delay) = verdict.delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(frame) = verdict.frame {
        to_receiver.send(frame).await?;
    }
    Ok(())
}

/// A Receiver ERROR means whatever we tried was caught.
fn observe_receiver(relay: &Relay, frame: &Frame, attack: Option<AppliedAttack>) {
    log_frame(&relay.events, Direction::ReceiverToSender, frame);
    if frame.frame_type != FrameType::Error {
        return;
    }
    if let Message::Error(err) = Message::from_frame(frame.clone()) {
        relay.events.attack_failed(rejection(attack, err.reason));
    }
}

/// Blame a Receiver rejection on the last transform that went through.
fn rejection(attack: Option<AppliedAttack>, reason: ErrorReason) -> String {
    match attack {
        Some(attack) => format!("{attack} failed: receiver rejected ({reason})"),
        None => format!("attack failed: receiver rejected ({reason})"),
    }
}

fn describe(direction: Direction, frame: &Frame) -> String {
    let shown = frame.payload.len().min(LOG_PREFIX_LEN);
    let ellipsis = if frame.payload.len() > LOG_PREFIX_LEN { "..." } else { "" };
    format!(
        "{direction} frame type={} len={} raw-hex={}{ellipsis}",
        frame.frame_type,
        frame.payload.len(),
        hex::encode(&frame.payload[..shown]),
    )
}

fn log_frame(events: &EventSink, direction: Direction, frame: &Frame) {
    events.log(describe(direction, frame));
}
