pub mod attack;
pub mod control;
pub mod crypto;
pub mod error;
pub mod event;
pub mod frame;
pub mod roles;
pub mod session;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use attack::{AttackConfig, AttackMode};
pub use control::{Controller, RoleConfig};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventSink, Role};
pub use frame::{Frame, FrameType, MAX_FRAME_SIZE};
pub use roles::{
    Attacker, AttackerConfig, HandshakeStatus, Receiver, ReceiverConfig, ReceiverState, RelayState,
    Sender, SenderConfig, SenderState,
};
pub use session::channel::Message;
pub use session::{EncMode, HandshakeParams, KxMode, SecurityConfig, SessionConfig};
