//! End-to-end attacks: Sender -> Attacker -> Receiver over loopback TCP.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use securelink::error::{Error, HandshakeError};
use securelink::frame::codec;
use securelink::frame::payload::{ErrorPayload, ErrorReason, PlaintextRecord};
use securelink::frame::{Frame, FrameType};
use securelink::session::retry::RetryPolicy;
use securelink::{
    AttackConfig, AttackMode, Attacker, AttackerConfig, EncMode, Event, EventKind, EventSink,
    KxMode, Receiver, ReceiverConfig, RelayState, Role, SecurityConfig, Sender, SenderConfig,
    SessionConfig,
};

const WAIT: Duration = Duration::from_secs(10);

fn session() -> SessionConfig {
    SessionConfig::builder()
        .handshake_timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(2))
        .reconnect_delay(Duration::from_millis(100))
        .build()
        .unwrap()
}

fn gcm() -> SecurityConfig {
    SecurityConfig::builder()
        .enc_mode(EncMode::AesGcm)
        .kx_mode(KxMode::Psk)
        .psk("attack psk")
        .build()
}

struct Topology {
    receiver: Receiver,
    receiver_events: mpsc::UnboundedReceiver<Event>,
    attacker: Attacker,
    attacker_events: mpsc::UnboundedReceiver<Event>,
    sender: Sender,
}

impl Topology {
    async fn start(security: SecurityConfig, attack: AttackConfig) -> Self {
        let (tx, receiver_events) = mpsc::unbounded_channel();
        let receiver = Receiver::bind(
            ReceiverConfig::new("127.0.0.1:0".parse().unwrap(), security.clone()),
            session(),
            EventSink::new(Role::Receiver, tx),
        )
        .await
        .unwrap();

        let victim = receiver.local_addr();
        let (tx, attacker_events) = mpsc::unbounded_channel();
        let attacker = Attacker::bind(
            AttackerConfig::new("127.0.0.1:0".parse().unwrap(), aimed_at(attack, victim)),
            session(),
            EventSink::new(Role::Attacker, tx),
        )
        .await
        .unwrap();

        let sender = Sender::new(
            SenderConfig::new(attacker.local_addr(), security),
            session(),
            EventSink::disabled(Role::Sender),
        );

        Self {
            receiver,
            receiver_events,
            attacker,
            attacker_events,
            sender,
        }
    }

    async fn shutdown(mut self) {
        self.sender.stop().await;
        self.attacker.stop().await;
        self.receiver.stop().await;
    }
}

fn aimed_at(attack: AttackConfig, victim: SocketAddr) -> AttackConfig {
    AttackConfig {
        victim_ip: victim.ip(),
        victim_port: victim.port(),
        ..attack
    }
}

fn attack(mode: AttackMode) -> AttackConfig {
    AttackConfig {
        mode,
        ..Default::default()
    }
}

async fn wait_for_event(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    pred: impl Fn(&EventKind) -> bool,
) -> EventKind {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event.kind) {
                return event.kind;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn any_received(kind: &EventKind) -> bool {
    matches!(kind, EventKind::MessageReceived { .. })
}

fn received(text: &str) -> EventKind {
    EventKind::MessageReceived { text: text.into() }
}

#[tokio::test]
async fn passive_relay_delivers_and_observes_plaintext() {
    let mut t = Topology::start(SecurityConfig::default(), attack(AttackMode::Passive)).await;
    t.sender.connect(None).await.unwrap();
    t.sender.send_message("hello").await.unwrap();

    assert_eq!(wait_for_event(&mut t.receiver_events, any_received).await, received("hello"));
    wait_for_event(&mut t.attacker_events, |k| {
        matches!(k, EventKind::Log { message } if message == "intercepted plaintext: \"hello\"")
    })
    .await;
    assert_eq!(t.attacker.state(), RelayState::Relaying);
    t.shutdown().await;
}

#[tokio::test]
async fn modify_rewrites_plaintext() {
    let mut t = Topology::start(SecurityConfig::default(), attack(AttackMode::Modify)).await;
    t.sender.connect(None).await.unwrap();
    t.sender.send_message("hello").await.unwrap();

    assert_eq!(
        wait_for_event(&mut t.receiver_events, any_received).await,
        received("[MITM modified]")
    );
    wait_for_event(&mut t.receiver_events, |k| matches!(k, EventKind::AttackSuccess { .. })).await;
    wait_for_event(&mut t.attacker_events, |k| matches!(k, EventKind::AttackSuccess { .. })).await;
    t.shutdown().await;
}

#[tokio::test]
async fn modify_cannot_touch_gcm_ciphertext() {
    let mut t = Topology::start(gcm(), attack(AttackMode::Modify)).await;
    t.sender.connect(None).await.unwrap();
    t.sender.send_message("hello").await.unwrap();

    assert_eq!(wait_for_event(&mut t.receiver_events, any_received).await, received("hello"));
    wait_for_event(&mut t.attacker_events, |k| matches!(k, EventKind::AttackFailed { .. })).await;
    t.shutdown().await;
}

#[tokio::test]
async fn downgrade_is_detected_by_sender() {
    let mut t = Topology::start(gcm(), attack(AttackMode::Downgrade)).await;

    let err = t.sender.connect(None).await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Handshake(HandshakeError::DowngradeDetected { sent, received })
                if sent.enc_mode == EncMode::AesGcm && received.enc_mode == EncMode::Plaintext
        ),
        "got {err:?}"
    );
    // The relay pins the Receiver's rejection on its own downgrade.
    let kind =
        wait_for_event(&mut t.attacker_events, |k| matches!(k, EventKind::AttackFailed { .. })).await;
    assert_eq!(
        kind,
        EventKind::AttackFailed {
            message: "downgrade attack on HELLO failed: receiver rejected (mode_mismatch)".into()
        }
    );
    t.shutdown().await;
}

#[tokio::test]
async fn replay_is_rejected_under_gcm() {
    let mut t = Topology::start(gcm(), attack(AttackMode::Replay)).await;
    t.sender.connect(None).await.unwrap();

    t.sender.send_message("first").await.unwrap();
    assert_eq!(wait_for_event(&mut t.receiver_events, any_received).await, received("first"));

    // The relay substitutes the first frame for the second.
    t.sender.send_message("second").await.unwrap();
    let kind = wait_for_event(&mut t.receiver_events, |k| {
        matches!(k, EventKind::ReplayRejected { .. } | EventKind::MessageReceived { .. })
    })
    .await;
    assert_eq!(kind, EventKind::ReplayRejected { seq: 1, last: 1 });
    wait_for_event(&mut t.receiver_events, |k| matches!(k, EventKind::AttackFailed { .. })).await;
    t.shutdown().await;
}

#[tokio::test]
async fn replay_succeeds_against_plaintext() {
    let mut t = Topology::start(SecurityConfig::default(), attack(AttackMode::Replay)).await;
    t.sender.connect(None).await.unwrap();

    t.sender.send_message("first").await.unwrap();
    t.sender.send_message("second").await.unwrap();
    assert_eq!(wait_for_event(&mut t.receiver_events, any_received).await, received("first"));
    assert_eq!(wait_for_event(&mut t.receiver_events, any_received).await, received("first"));
    t.shutdown().await;
}

#[tokio::test]
async fn dropped_messages_never_arrive() {
    let inactive = AttackConfig {
        active: false,
        ..attack(AttackMode::Drop)
    };
    let mut t = Topology::start(SecurityConfig::default(), inactive).await;
    t.sender.connect(None).await.unwrap();

    let mut config = t.attacker.attack_config();
    config.drop_rate = 100.0;
    t.attacker.start_attack(Some(config)).unwrap();
    t.sender.send_message("lost").await.unwrap();
    wait_for_event(&mut t.attacker_events, |k| matches!(k, EventKind::AttackSuccess { .. })).await;

    t.attacker.stop_attack();
    t.sender.send_message("kept").await.unwrap();
    assert_eq!(wait_for_event(&mut t.receiver_events, any_received).await, received("kept"));
    t.shutdown().await;
}

#[tokio::test]
async fn delay_holds_frames_back() {
    let mut t = Topology::start(SecurityConfig::default(), attack(AttackMode::Passive)).await;
    t.sender.connect(None).await.unwrap();

    t.attacker
        .update_attack_config(AttackConfig {
            mode: AttackMode::Delay,
            delay_ms: 300,
            ..t.attacker.attack_config()
        })
        .unwrap();
    let started = Instant::now();
    t.sender.send_message("slow").await.unwrap();
    assert_eq!(wait_for_event(&mut t.receiver_events, any_received).await, received("slow"));
    assert!(started.elapsed() >= Duration::from_millis(300));
    t.shutdown().await;
}

#[tokio::test]
async fn delayed_sender_frame_does_not_hold_back_receiver_frames() {
    // Raw peers on both sides so the timing of each leg is under test control.
    let victim = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut attacker = Attacker::bind(
        AttackerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            aimed_at(attack(AttackMode::Passive), victim.local_addr().unwrap()),
        ),
        session(),
        EventSink::disabled(Role::Attacker),
    )
    .await
    .unwrap();

    let (read_half, write_half) = tokio::net::TcpStream::connect(attacker.local_addr())
        .await
        .unwrap()
        .into_split();
    let mut sender_in = codec::decode(read_half);
    let mut sender_out = codec::writer(write_half);

    let first = Frame::json(FrameType::Data, &PlaintextRecord { text: "warm-up".into() }).unwrap();
    sender_out.send(first.clone()).await.unwrap();
    let (stream, _) = victim.accept().await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut victim_in = codec::decode(read_half);
    let mut victim_out = codec::writer(write_half);
    assert_eq!(victim_in.next().await.unwrap().unwrap(), first);

    attacker
        .update_attack_config(AttackConfig {
            mode: AttackMode::Delay,
            delay_ms: 1500,
            ..attacker.attack_config()
        })
        .unwrap();
    let held = Frame::json(FrameType::Data, &PlaintextRecord { text: "held".into() }).unwrap();
    sender_out.send(held.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let error = Frame::json(
        FrameType::Error,
        &ErrorPayload {
            reason: ErrorReason::Other,
            message: "rejected".into(),
            declared: None,
        },
    )
    .unwrap();
    let sent_at = Instant::now();
    victim_out.send(error.clone()).await.unwrap();

    let got = tokio::time::timeout(WAIT, sender_in.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(got, error);
    assert!(
        sent_at.elapsed() < Duration::from_millis(500),
        "receiver frame took {:?} behind a delayed sender frame",
        sent_at.elapsed()
    );

    // The delayed frame still arrives once its stall is over.
    let late = tokio::time::timeout(WAIT, victim_in.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(late, held);
    attacker.stop().await;
}

#[tokio::test]
async fn frames_are_buffered_until_receiver_comes_up() {
    // Reserve a port for a Receiver that does not exist yet.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let victim = probe.local_addr().unwrap();
    drop(probe);

    let (tx, mut attacker_events) = mpsc::unbounded_channel();
    let mut attacker = Attacker::bind(
        AttackerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            aimed_at(attack(AttackMode::Passive), victim),
        ),
        session(),
        EventSink::new(Role::Attacker, tx),
    )
    .await
    .unwrap();

    let mut sender = Sender::new(
        SenderConfig::new(attacker.local_addr(), SecurityConfig::default()),
        session(),
        EventSink::disabled(Role::Sender),
    );
    let connecting = tokio::spawn(async move {
        sender.connect(None).await.map(|()| sender)
    });

    // At least one dial fails while the HELLO sits in the queue.
    wait_for_event(&mut attacker_events, |k| matches!(k, EventKind::Error { .. })).await;
    assert_eq!(attacker.state(), RelayState::Buffering);

    let (tx, mut receiver_events) = mpsc::unbounded_channel();
    let mut receiver = Receiver::bind(
        ReceiverConfig::new(victim, SecurityConfig::default()),
        session(),
        EventSink::new(Role::Receiver, tx),
    )
    .await
    .unwrap();

    let mut sender = tokio::time::timeout(WAIT, connecting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    sender.send_message("late but intact").await.unwrap();
    assert_eq!(
        wait_for_event(&mut receiver_events, any_received).await,
        received("late but intact")
    );

    sender.stop().await;
    attacker.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn new_sender_preempts_previous_session() {
    let mut t = Topology::start(SecurityConfig::default(), attack(AttackMode::Passive)).await;
    t.sender.connect(None).await.unwrap();

    let mut sender_state = t.sender.subscribe();
    // The Receiver may still be closing the old relay leg when the new one
    // dials in, so the newcomer is allowed a few attempts.
    let retrying = SessionConfig::builder()
        .handshake_timeout(Duration::from_secs(10))
        .retry_policy(RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 1.0,
        })
        .build()
        .unwrap();
    let mut second = Sender::new(
        SenderConfig::new(t.attacker.local_addr(), SecurityConfig::default()),
        retrying,
        EventSink::disabled(Role::Sender),
    );
    second.connect(None).await.unwrap();
    tokio::time::timeout(WAIT, sender_state.wait_for(|s| *s == securelink::SenderState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    second.send_message("from the newcomer").await.unwrap();
    assert_eq!(
        wait_for_event(&mut t.receiver_events, any_received).await,
        received("from the newcomer")
    );
    second.stop().await;
    t.shutdown().await;
}
