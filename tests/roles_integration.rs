//! Sender and Receiver talking over real TCP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};

use securelink::error::{Error, HandshakeError};
use securelink::{
    EncMode, Event, EventKind, EventSink, HandshakeStatus, KxMode, Receiver, ReceiverConfig,
    ReceiverState, Role, SecurityConfig, Sender, SenderConfig, SenderState, SessionConfig,
};

const WAIT: Duration = Duration::from_secs(10);

fn session() -> SessionConfig {
    SessionConfig::builder()
        .handshake_timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

fn gcm() -> SecurityConfig {
    SecurityConfig::builder()
        .enc_mode(EncMode::AesGcm)
        .kx_mode(KxMode::Psk)
        .psk("roles psk")
        .build()
}

async fn start_receiver(security: SecurityConfig) -> (Receiver, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let receiver = Receiver::bind(
        ReceiverConfig::new("127.0.0.1:0".parse().unwrap(), security),
        session(),
        EventSink::new(Role::Receiver, tx),
    )
    .await
    .unwrap();
    (receiver, rx)
}

fn sender_for(addr: SocketAddr, security: SecurityConfig) -> Sender {
    Sender::new(
        SenderConfig::new(addr, security),
        session(),
        EventSink::disabled(Role::Sender),
    )
}

/// Wait for the first event matching `pred`, skipping the rest.
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

async fn wait_for_state<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

fn received(text: &str) -> impl Fn(&EventKind) -> bool + '_ {
    move |kind| matches!(kind, EventKind::MessageReceived { text: t } if t == text)
}

#[tokio::test]
async fn plaintext_message_is_delivered() {
    let (mut receiver, mut events) = start_receiver(SecurityConfig::default()).await;
    let mut sender = sender_for(receiver.local_addr(), SecurityConfig::default());

    sender.connect(None).await.unwrap();
    assert_eq!(
        sender.check_handshake(),
        HandshakeStatus::new(true, "Handshake complete - plaintext")
    );
    sender.send_message("hello").await.unwrap();
    wait_for_event(&mut events, received("hello")).await;

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn encrypted_messages_arrive_in_order() {
    let (mut receiver, mut events) = start_receiver(gcm()).await;
    let mut sender = sender_for(receiver.local_addr(), gcm());
    sender.connect(None).await.unwrap();

    let mut state = receiver.subscribe();
    wait_for_state(&mut state, |s| matches!(s, ReceiverState::Ready { .. })).await;
    assert_eq!(
        receiver.check_handshake(),
        HandshakeStatus::new(true, "Handshake complete - encrypted")
    );

    for text in ["one", "two", "three"] {
        sender.send_message(text).await.unwrap();
    }
    for text in ["one", "two", "three"] {
        let kind = wait_for_event(&mut events, |k| matches!(k, EventKind::MessageReceived { .. })).await;
        assert_eq!(kind, EventKind::MessageReceived { text: text.into() });
    }

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn second_connection_is_refused() {
    let (mut receiver, mut events) = start_receiver(SecurityConfig::default()).await;
    let addr = receiver.local_addr();
    let mut sender = sender_for(addr, SecurityConfig::default());
    sender.connect(None).await.unwrap();

    // The intruder is accepted at the TCP level and closed straight away.
    let mut intruder = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, intruder.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    // The original session is unaffected.
    sender.send_message("still here").await.unwrap();
    wait_for_event(&mut events, received("still here")).await;

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn mode_mismatch_fails_connect_and_receiver_keeps_listening() {
    let (mut receiver, _events) = start_receiver(gcm()).await;
    let mut sender = sender_for(receiver.local_addr(), SecurityConfig::default());

    let err = sender.connect(None).await.unwrap_err();
    assert!(matches!(err, Error::Handshake(HandshakeError::Rejected { .. })));
    assert_eq!(sender.state(), SenderState::Disconnected);

    let mut state = receiver.subscribe();
    wait_for_state(&mut state, |s| *s == ReceiverState::Listening).await;

    // A correctly configured Sender still gets through.
    sender.connect(Some(SenderConfig::new(receiver.local_addr(), gcm()))).await.unwrap();
    assert_eq!(sender.state(), SenderState::Ready);

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn security_update_drops_current_connection() {
    let (mut receiver, mut events) = start_receiver(SecurityConfig::default()).await;
    let addr = receiver.local_addr();
    let mut sender = sender_for(addr, SecurityConfig::default());
    sender.connect(None).await.unwrap();

    let mut sender_state = sender.subscribe();
    receiver.update_security_config(gcm()).unwrap();
    wait_for_state(&mut sender_state, |s| *s == SenderState::Disconnected).await;
    assert!(sender.send_message("too late").await.is_err());

    // New connections must use the new modes.
    sender.connect(Some(SenderConfig::new(addr, gcm()))).await.unwrap();
    sender.send_message("after update").await.unwrap();
    wait_for_event(&mut events, received("after update")).await;

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test]
async fn sender_stop_sends_close() {
    let (mut receiver, mut events) = start_receiver(SecurityConfig::default()).await;
    let mut sender = sender_for(receiver.local_addr(), SecurityConfig::default());
    sender.connect(None).await.unwrap();

    sender.stop().await;
    assert_eq!(sender.state(), SenderState::Disconnected);
    wait_for_event(
        &mut events,
        |k| matches!(k, EventKind::Log { message } if message == "peer closed connection"),
    )
    .await;

    let mut state = receiver.subscribe();
    wait_for_state(&mut state, |s| *s == ReceiverState::Listening).await;
    receiver.stop().await;
}

#[tokio::test]
async fn receiver_stop_disconnects_sender() {
    let (mut receiver, _events) = start_receiver(SecurityConfig::default()).await;
    let addr = receiver.local_addr();
    let mut sender = sender_for(addr, SecurityConfig::default());
    sender.connect(None).await.unwrap();

    let mut sender_state = sender.subscribe();
    receiver.stop().await;
    wait_for_state(&mut sender_state, |s| *s == SenderState::Disconnected).await;

    // The listener is gone too.
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
