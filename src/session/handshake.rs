use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

use super::{EncMode, HandshakeParams, KxMode, SecurityConfig};
use crate::crypto::rsa::{self, RsaKeyPair};
use crate::crypto::{dh, random_bytes, SESSION_KEY_LEN};
use crate::error::{CryptoError, Error, FrameError, HandshakeError};
use crate::event::Role;
use crate::frame::payload::{
    Ack, ErrorPayload, ErrorReason, Hello, KeyExchangeOffer, KeyExchangeReply,
};
use crate::frame::{Frame, FrameType};

/// Handshake progress, shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    HelloSent,
    HelloReceived,
    Negotiated,
    KeyExchanged,
    Established,
    Aborted,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "IDLE",
            Self::HelloSent => "HELLO_SENT",
            Self::HelloReceived => "HELLO_RECEIVED",
            Self::Negotiated => "NEGOTIATED",
            Self::KeyExchanged => "KEY_EXCHANGED",
            Self::Established => "ESTABLISHED",
            Self::Aborted => "ABORTED",
        })
    }
}

/// Session key material; exactly one kind per session.
pub enum KeyMaterial {
    /// PLAINTEXT with PSK exchange and no key configured.
    None,
    /// PSK or RSA-transported key.
    SessionKey(Zeroizing<Vec<u8>>),
    /// Diffie-Hellman shared secret.
    SharedSecret(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    pub fn session_key(bytes: impl Into<Vec<u8>>) -> Self {
        Self::SessionKey(Zeroizing::new(bytes.into()))
    }

    pub fn shared_secret(bytes: impl Into<Vec<u8>>) -> Self {
        Self::SharedSecret(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::None => None,
            Self::SessionKey(k) | Self::SharedSecret(k) => Some(k.as_slice()),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::SessionKey(k) => write!(f, "SessionKey({} bytes)", k.len()),
            Self::SharedSecret(k) => write!(f, "SharedSecret({} bytes)", k.len()),
        }
    }
}

/// Result of a completed handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub params: HandshakeParams,
    pub keys: KeyMaterial,
    /// Carried from HELLO; no protocol effect.
    pub demo_mode: bool,
}

struct Progress {
    role: Role,
    state: HandshakeState,
}

impl Progress {
    fn new(role: Role) -> Self {
        Self {
            role,
            state: HandshakeState::Idle,
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        tracing::debug!(role = %self.role, from = %self.state, to = %next, "handshake state");
        self.state = next;
    }
}

/// Build the HELLO frame a Sender opens every connection with.
pub fn build_hello(
    role: Role,
    enc_mode: EncMode,
    kx_mode: KxMode,
    demo_mode: bool,
) -> Result<Frame, Error> {
    Frame::json(
        FrameType::Hello,
        &Hello {
            role,
            enc_mode,
            kx_mode,
            demo_mode,
        },
    )
}

// -- Transport helpers --

async fn recv_frame<S>(reader: &mut S) -> Result<Frame, Error>
where
    S: Stream<Item = Result<Frame, FrameError>> + Unpin,
{
    match reader.next().await {
        Some(frame) => Ok(frame?),
        None => Err(HandshakeError::Closed.into()),
    }
}

async fn send_frame<K>(writer: &mut K, frame: Frame) -> Result<(), Error>
where
    K: Sink<Frame, Error = FrameError> + Unpin,
{
    tracing::trace!(frame_type = %frame.frame_type, len = frame.payload.len(), "sending handshake frame");
    writer.send(frame).await?;
    Ok(())
}

fn parse<T: DeserializeOwned>(frame: &Frame) -> Result<T, HandshakeError> {
    serde_json::from_slice(&frame.payload)
        .map_err(|e| HandshakeError::Malformed(format!("{} payload: {e}", frame.frame_type)))
}

fn decode_b64(field: &'static str, value: Option<&str>) -> Result<Vec<u8>, HandshakeError> {
    let value = value.ok_or(HandshakeError::MissingField(field))?;
    STANDARD
        .decode(value.as_bytes())
        .map_err(|e| HandshakeError::Malformed(format!("{field}: {e}")))
}

fn unexpected(frame: &Frame, expected: FrameType) -> Error {
    HandshakeError::UnexpectedFrame {
        expected: expected.name(),
        actual: frame.frame_type.to_string(),
    }
    .into()
}

/// Map an ERROR frame received by the Sender to a typed failure.
///
/// A `mode_mismatch` naming parameters other than the ones we sent means our
/// HELLO was rewritten on the way.
fn rejection(frame: &Frame, sent: HandshakeParams) -> Error {
    match parse::<ErrorPayload>(frame) {
        Ok(ErrorPayload {
            reason: ErrorReason::ModeMismatch,
            declared: Some(declared),
            ..
        }) if declared != sent => HandshakeError::DowngradeDetected {
            sent,
            received: declared,
        }
        .into(),
        Ok(payload) => HandshakeError::Rejected {
            reason: payload.reason,
            message: payload.message,
        }
        .into(),
        Err(e) => e.into(),
    }
}

/// Receive the next frame on the Sender side, turning ERROR into a rejection.
async fn expect_from_receiver<S>(
    reader: &mut S,
    expected: FrameType,
    sent: HandshakeParams,
) -> Result<Frame, Error>
where
    S: Stream<Item = Result<Frame, FrameError>> + Unpin,
{
    let frame = recv_frame(reader).await?;
    match frame.frame_type {
        t if t == expected => Ok(frame),
        FrameType::Error => Err(rejection(&frame, sent)),
        _ => Err(unexpected(&frame, expected)),
    }
}

fn psk_material(security: &SecurityConfig) -> KeyMaterial {
    match security.psk() {
        Some(psk) => KeyMaterial::session_key(psk.as_bytes().to_vec()),
        None => KeyMaterial::None,
    }
}

/// Key generation and MODP exponentiation run on the blocking pool.
async fn off_executor<T, F>(work: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    Ok(result?)
}

/// Run the initiator (Sender) side of the handshake.
pub async fn initiate<S, K>(
    reader: &mut S,
    writer: &mut K,
    security: &SecurityConfig,
) -> Result<HandshakeOutcome, Error>
where
    S: Stream<Item = Result<Frame, FrameError>> + Unpin,
    K: Sink<Frame, Error = FrameError> + Unpin,
{
    let mut progress = Progress::new(Role::Sender);
    let result = run_initiator(reader, writer, security, &mut progress).await;
    if result.is_err() {
        progress.advance(HandshakeState::Aborted);
    }
    result
}

async fn run_initiator<S, K>(
    reader: &mut S,
    writer: &mut K,
    security: &SecurityConfig,
    progress: &mut Progress,
) -> Result<HandshakeOutcome, Error>
where
    S: Stream<Item = Result<Frame, FrameError>> + Unpin,
    K: Sink<Frame, Error = FrameError> + Unpin,
{
    if security.missing_psk() {
        return Err(HandshakeError::PskRequired.into());
    }
    let sent = security.params();

    // Step 1: HELLO.
    let hello = build_hello(Role::Sender, sent.enc_mode, sent.kx_mode, security.demo_mode)?;
    send_frame(writer, hello).await?;
    progress.advance(HandshakeState::HelloSent);

    // Step 2: NEGOTIATE must echo exactly what we declared.
    let frame = expect_from_receiver(reader, FrameType::Negotiate, sent).await?;
    let echoed: HandshakeParams = parse(&frame)?;
    if echoed != sent {
        return Err(HandshakeError::DowngradeDetected {
            sent,
            received: echoed,
        }
        .into());
    }
    progress.advance(HandshakeState::Negotiated);

    // Step 3: the Receiver's key exchange contribution.
    let frame = expect_from_receiver(reader, FrameType::KeyExchange, sent).await?;
    let offer: KeyExchangeOffer = parse(&frame)?;
    if offer.params != sent {
        return Err(HandshakeError::DowngradeDetected {
            sent,
            received: offer.params,
        }
        .into());
    }

    let keys = match sent.kx_mode {
        KxMode::Psk => psk_material(security),
        KxMode::Rsa => {
            let pem = offer
                .rsa_public_key
                .as_deref()
                .ok_or(HandshakeError::MissingField("rsaPublicKey"))?;
            let public = rsa::parse_public_key_pem(pem)?;
            let session_key = Zeroizing::new(random_bytes::<SESSION_KEY_LEN>().to_vec());
            let wrapped = rsa::encrypt_with_public_key(&public, &session_key)?;
            let reply = KeyExchangeReply {
                enc_session_key: Some(STANDARD.encode(wrapped)),
                dh_public_key: None,
            };
            send_frame(writer, Frame::json(FrameType::KeyExchange, &reply)?).await?;
            KeyMaterial::SessionKey(session_key)
        }
        KxMode::Dh => {
            let peer = decode_b64("dhPublicKey", offer.dh_public_key.as_deref())?;
            let (public, secret) = off_executor(move || {
                let party = dh::create_party();
                let secret = party.compute_shared_secret(&peer)?;
                Ok((party.public_key().to_vec(), secret))
            })
            .await?;
            let reply = KeyExchangeReply {
                enc_session_key: None,
                dh_public_key: Some(STANDARD.encode(&public)),
            };
            send_frame(writer, Frame::json(FrameType::KeyExchange, &reply)?).await?;
            KeyMaterial::SharedSecret(secret)
        }
    };
    progress.advance(HandshakeState::KeyExchanged);

    // Step 4: ACK.
    let frame = expect_from_receiver(reader, FrameType::Ack, sent).await?;
    let ack: Ack = parse(&frame)?;
    if !ack.ok {
        return Err(HandshakeError::Malformed("ACK without ok".into()).into());
    }
    progress.advance(HandshakeState::Established);

    Ok(HandshakeOutcome {
        params: sent,
        keys,
        demo_mode: security.demo_mode,
    })
}

/// Run the responder (Receiver) side of the handshake.
///
/// On a mode mismatch or a missing PSK an ERROR frame is written before the
/// error is returned; the caller is expected to close the connection.
pub async fn respond<S, K>(
    reader: &mut S,
    writer: &mut K,
    security: &SecurityConfig,
) -> Result<HandshakeOutcome, Error>
where
    S: Stream<Item = Result<Frame, FrameError>> + Unpin,
    K: Sink<Frame, Error = FrameError> + Unpin,
{
    let mut progress = Progress::new(Role::Receiver);
    let result = run_responder(reader, writer, security, &mut progress).await;
    if result.is_err() {
        progress.advance(HandshakeState::Aborted);
    }
    result
}

async fn run_responder<S, K>(
    reader: &mut S,
    writer: &mut K,
    security: &SecurityConfig,
    progress: &mut Progress,
) -> Result<HandshakeOutcome, Error>
where
    S: Stream<Item = Result<Frame, FrameError>> + Unpin,
    K: Sink<Frame, Error = FrameError> + Unpin,
{
    // Step 1: HELLO.
    let frame = recv_frame(reader).await?;
    if frame.frame_type != FrameType::Hello {
        return Err(unexpected(&frame, FrameType::Hello));
    }
    let hello: Hello = parse(&frame)?;
    progress.advance(HandshakeState::HelloReceived);

    // Compare against our own configuration, never against anything in transit.
    let expected = security.params();
    let declared = hello.params();
    if declared != expected {
        let error = ErrorPayload {
            reason: ErrorReason::ModeMismatch,
            message: format!("receiver requires {expected}, sender declared {declared}"),
            declared: Some(declared),
        };
        send_frame(writer, Frame::json(FrameType::Error, &error)?).await?;
        return Err(HandshakeError::ModeMismatch { expected, declared }.into());
    }
    if security.missing_psk() {
        let error = ErrorPayload {
            reason: ErrorReason::PskRequired,
            message: format!("{} with PSK exchange needs a pre-shared key", expected.enc_mode),
            declared: None,
        };
        send_frame(writer, Frame::json(FrameType::Error, &error)?).await?;
        return Err(HandshakeError::PskRequired.into());
    }

    // Step 2: echo the agreed parameters.
    send_frame(writer, Frame::json(FrameType::Negotiate, &expected)?).await?;
    progress.advance(HandshakeState::Negotiated);

    // Step 3: key exchange.
    let keys = match expected.kx_mode {
        KxMode::Psk => {
            let offer = KeyExchangeOffer {
                params: expected,
                rsa_public_key: None,
                dh_public_key: None,
            };
            send_frame(writer, Frame::json(FrameType::KeyExchange, &offer)?).await?;
            psk_material(security)
        }
        KxMode::Rsa => {
            let pair = off_executor(RsaKeyPair::generate).await?;
            let offer = KeyExchangeOffer {
                params: expected,
                rsa_public_key: Some(pair.public_key_pem()?),
                dh_public_key: None,
            };
            send_frame(writer, Frame::json(FrameType::KeyExchange, &offer)?).await?;

            let reply = recv_key_exchange_reply(reader).await?;
            let wrapped = decode_b64("encSessionKey", reply.enc_session_key.as_deref())?;
            KeyMaterial::SessionKey(pair.decrypt(&wrapped)?)
        }
        KxMode::Dh => {
            let party = off_executor(|| Ok(dh::create_party())).await?;
            let offer = KeyExchangeOffer {
                params: expected,
                rsa_public_key: None,
                dh_public_key: Some(STANDARD.encode(party.public_key())),
            };
            send_frame(writer, Frame::json(FrameType::KeyExchange, &offer)?).await?;

            let reply = recv_key_exchange_reply(reader).await?;
            let peer = decode_b64("dhPublicKey", reply.dh_public_key.as_deref())?;
            let secret = off_executor(move || party.compute_shared_secret(&peer)).await?;
            KeyMaterial::SharedSecret(secret)
        }
    };
    progress.advance(HandshakeState::KeyExchanged);

    // Step 4: ACK.
    send_frame(writer, Frame::json(FrameType::Ack, &Ack::OK)?).await?;
    progress.advance(HandshakeState::Established);

    Ok(HandshakeOutcome {
        params: expected,
        keys,
        demo_mode: hello.demo_mode,
    })
}

async fn recv_key_exchange_reply<S>(reader: &mut S) -> Result<KeyExchangeReply, Error>
where
    S: Stream<Item = Result<Frame, FrameError>> + Unpin,
{
    let frame = recv_frame(reader).await?;
    if frame.frame_type != FrameType::KeyExchange {
        return Err(unexpected(&frame, FrameType::KeyExchange));
    }
    Ok(parse(&frame)?)
}
