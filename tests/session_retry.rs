//! Sender connects under a retry policy.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use securelink::error::{Error, HandshakeError, SessionError};
use securelink::event::Role;
use securelink::session::retry::RetryPolicy;
use securelink::{
    EncMode, Event, EventKind, EventSink, KxMode, Receiver, ReceiverConfig, SecurityConfig,
    Sender, SenderConfig, SenderState, SessionConfig,
};

/// A loopback address nothing is listening on (yet).
async fn vacant_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn retrying(policy: RetryPolicy) -> SessionConfig {
    SessionConfig::builder()
        .connect_timeout(Duration::from_secs(2))
        .retry_policy(policy)
        .build()
        .unwrap()
}

fn retry_logs(events: &mut mpsc::UnboundedReceiver<Event>) -> Vec<String> {
    let mut logs = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventKind::Log { message } = event.kind {
            if message.contains("; retry ") {
                logs.push(message);
            }
        }
    }
    logs
}

#[tokio::test]
async fn sender_retries_until_receiver_is_up() {
    let addr = vacant_addr().await;
    let session = retrying(RetryPolicy::fixed(20, Duration::from_millis(50)));

    let receiver_session = session.clone();
    let receiver = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Receiver::bind(
            ReceiverConfig::new(addr, SecurityConfig::default()),
            receiver_session,
            EventSink::disabled(Role::Receiver),
        )
        .await
        .unwrap()
    });

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut sender = Sender::new(
        SenderConfig::new(addr, SecurityConfig::default()),
        session,
        EventSink::new(Role::Sender, tx),
    );
    sender.connect(None).await.unwrap();
    assert_eq!(sender.state(), SenderState::Ready);

    let logs = retry_logs(&mut events);
    assert!(!logs.is_empty());
    assert!(logs[0].starts_with(&format!("connect to {addr} failed: ")));
    assert!(logs[0].contains("; retry 1 in "));

    sender.stop().await;
    let mut receiver = receiver.await.unwrap();
    receiver.stop().await;
}

#[tokio::test]
async fn sender_gives_up_after_policy_is_exhausted() {
    let addr = vacant_addr().await;
    let (tx, mut events) = mpsc::unbounded_channel();
    let mut sender = Sender::new(
        SenderConfig::new(addr, SecurityConfig::default()),
        retrying(RetryPolicy::fixed(2, Duration::from_millis(5))),
        EventSink::new(Role::Sender, tx),
    );

    let err = sender.connect(None).await.unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
    assert_eq!(sender.state(), SenderState::Disconnected);
    // Initial attempt plus two retries.
    assert_eq!(retry_logs(&mut events).len(), 2);
}

#[tokio::test]
async fn rejection_by_receiver_is_not_retried() {
    let gcm = SecurityConfig::builder()
        .enc_mode(EncMode::AesGcm)
        .kx_mode(KxMode::Psk)
        .psk("retry psk")
        .build();
    let mut receiver = Receiver::bind(
        ReceiverConfig::new("127.0.0.1:0".parse().unwrap(), gcm),
        SessionConfig::default(),
        EventSink::disabled(Role::Receiver),
    )
    .await
    .unwrap();

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut sender = Sender::new(
        SenderConfig::new(receiver.local_addr(), SecurityConfig::default()),
        retrying(RetryPolicy::fixed(5, Duration::from_secs(1))),
        EventSink::new(Role::Sender, tx),
    );

    let started = Instant::now();
    let err = sender.connect(None).await.unwrap_err();
    assert!(matches!(err, Error::Handshake(HandshakeError::Rejected { .. })));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(retry_logs(&mut events).is_empty());

    receiver.stop().await;
}

#[test]
fn only_unreachable_or_silent_peers_are_transient() {
    let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
    assert!(Error::from(refused).is_transient());
    assert!(Error::from(HandshakeError::Closed).is_transient());
    assert!(Error::from(SessionError::Timeout).is_transient());
    assert!(Error::from(SessionError::ConnectTimeout("10.0.0.1:1".parse().unwrap())).is_transient());

    assert!(!Error::from(HandshakeError::PskRequired).is_transient());
    assert!(!Error::from(SessionError::NotEstablished).is_transient());
}

#[test]
fn backoff_below_one_is_rejected() {
    let result = SessionConfig::builder()
        .retry_policy(RetryPolicy {
            backoff_multiplier: 0.5,
            ..Default::default()
        })
        .build();
    assert!(result.is_err());
}
