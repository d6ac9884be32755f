//! Per-frame attack transforms for the Sender-to-Receiver direction.
//!
//! The relay holds no session keys: everything here works on the raw frame
//! payload and can only change what is not cryptographically protected.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde_json::Value;

use super::{AttackConfig, AttackMode};
use crate::frame::payload::PlaintextRecord;
use crate::frame::{Frame, FrameType};
use crate::session::EncMode;

/// Outcome of an attack step, surfaced as an event by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackReport {
    /// The transform was applied.
    Success(String),
    /// The transform could not be applied to this frame.
    Failed(String),
    /// Passive observation.
    Observed(String),
}

/// What to do with one intercepted frame.
#[derive(Debug)]
pub struct Verdict {
    /// Frame to forward; `None` drops it.
    pub frame: Option<Frame>,
    /// Stall before forwarding.
    pub delay: Option<Duration>,
    pub report: Option<AttackReport>,
}

impl Verdict {
    fn forward(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            delay: None,
            report: None,
        }
    }

    fn with_report(mut self, report: AttackReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// A transform that actually altered the Sender's traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedAttack {
    pub mode: AttackMode,
    pub frame_type: FrameType,
}

impl fmt::Display for AppliedAttack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} attack on {}", self.mode, self.frame_type)
    }
}

/// Stateful transformer for one Sender connection.
#[derive(Debug, Default)]
pub struct Tamperer {
    last_data: Option<Frame>,
    last_applied: Option<AppliedAttack>,
}

impl Tamperer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent transform that succeeded on this connection.
    pub fn last_applied(&self) -> Option<AppliedAttack> {
        self.last_applied
    }

    /// Apply the configured attack to a Sender-to-Receiver frame.
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        config: &AttackConfig,
        frame: Frame,
        rng: &mut R,
    ) -> Verdict {
        // Every DATA frame is snapshotted; replay works on the previous one.
        let previous = if frame.frame_type == FrameType::Data {
            self.last_data.replace(frame.clone())
        } else {
            None
        };

        let mode = config.effective_mode();
        let frame_type = frame.frame_type;
        let verdict = match (mode, frame_type) {
            (AttackMode::Passive, _) => observe(frame),
            (AttackMode::Drop, frame_type) => {
                if rng.gen::<f64>() * 100.0 < config.drop_rate {
                    Verdict {
                        frame: None,
                        delay: None,
                        report: Some(AttackReport::Success(format!(
                            "dropped {frame_type} frame (dropRate {}%)",
                            config.drop_rate
                        ))),
                    }
                } else {
                    Verdict::forward(frame)
                }
            }
            (AttackMode::Delay, frame_type) if config.delay_ms > 0 => Verdict {
                frame: Some(frame),
                delay: Some(config.delay()),
                report: Some(AttackReport::Success(format!(
                    "delayed {frame_type} frame by {}ms",
                    config.delay_ms
                ))),
            },
            (AttackMode::Modify, FrameType::Data) => modify(frame, config.modify_text()),
            (AttackMode::Replay, FrameType::Data) => match previous {
                Some(previous) => Verdict::forward(previous)
                    .with_report(AttackReport::Success("replayed previous DATA frame".into())),
                None => Verdict::forward(frame).with_report(AttackReport::Observed(
                    "first DATA frame captured for replay".into(),
                )),
            },
            (AttackMode::Downgrade, FrameType::Hello) => downgrade(frame),
            _ => Verdict::forward(frame),
        };

        if matches!(verdict.report, Some(AttackReport::Success(_))) {
            self.last_applied = Some(AppliedAttack { mode, frame_type });
        }
        verdict
    }
}

fn observe(frame: Frame) -> Verdict {
    if frame.frame_type != FrameType::Data {
        return Verdict::forward(frame);
    }
    let report = match serde_json::from_slice::<PlaintextRecord>(&frame.payload) {
        Ok(record) => AttackReport::Observed(format!("intercepted plaintext: \"{}\"", record.text)),
        Err(_) => AttackReport::Observed("DATA frame is encrypted, contents opaque".into()),
    };
    Verdict::forward(frame).with_report(report)
}

fn modify(frame: Frame, text: &str) -> Verdict {
    let mut record = match serde_json::from_slice::<Value>(&frame.payload) {
        Ok(Value::Object(record)) if record.get("text").is_some_and(Value::is_string) => record,
        _ => {
            return Verdict::forward(frame).with_report(AttackReport::Failed(
                "modify failed: message is encrypted, cannot rewrite ciphertext".into(),
            ))
        }
    };
    record.insert("text".into(), Value::String(text.to_string()));
    match serde_json::to_vec(&record) {
        Ok(payload) => Verdict::forward(Frame::new(FrameType::Data, Bytes::from(payload)))
            .with_report(AttackReport::Success(format!(
                "modified plaintext message to \"{text}\""
            ))),
        Err(e) => Verdict::forward(frame)
            .with_report(AttackReport::Failed(format!("modify failed: {e}"))),
    }
}

fn downgrade(frame: Frame) -> Verdict {
    let mut hello = match serde_json::from_slice::<Value>(&frame.payload) {
        Ok(Value::Object(hello)) => hello,
        _ => {
            return Verdict::forward(frame).with_report(AttackReport::Failed(
                "downgrade failed: cannot parse HELLO".into(),
            ))
        }
    };
    let original = hello.get("encMode").cloned().unwrap_or(Value::Null);
    hello.insert("encMode".into(), Value::from(EncMode::Plaintext as u8));
    match serde_json::to_vec(&hello) {
        Ok(payload) => Verdict::forward(Frame::new(FrameType::Hello, Bytes::from(payload)))
            .with_report(AttackReport::Success(format!(
                "downgraded HELLO encMode {original} -> 0"
            ))),
        Err(e) => Verdict::forward(frame)
            .with_report(AttackReport::Failed(format!("downgrade failed: {e}"))),
    }
}
