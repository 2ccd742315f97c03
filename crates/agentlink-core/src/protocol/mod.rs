//! Wire protocol for the agent messaging channel.
//!
//! A JSON, versioned protocol carried over a message-oriented transport.
//! Agent message bodies are encrypted; only framing and control payloads
//! are visible on the wire.
//!
//! ## Frame Structure
//!
//! ```text
//! {
//!   "version":   1,
//!   "eventType": "QUERY",
//!   "payload":   { ... }
//! }
//! ```
//!
//! Message events (`HANDSHAKE` key announcements, `QUERY`, `RESPONSE`,
//! `PROPOSAL`, `CONFIRMATION`, `REJECTION`) carry an encrypted envelope as
//! payload; control events carry plaintext payload structs. Frames that
//! fail validation are dropped.

mod frame;
mod types;

pub use frame::{Frame, MAX_FRAME_SIZE};
pub use types::{
    AckPayload, AuthPayload, AuthResult, DisconnectPayload, ErrorPayload, EventType,
    HeartbeatPayload, PresencePayload, PresenceStatus, SignedHello, TypingPayload,
};

use crate::error::{Error, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Minimum supported protocol version.
pub const MIN_PROTOCOL_VERSION: u8 = 1;

/// Validate that a protocol version is supported.
pub fn validate_version(version: u8) -> Result<()> {
    if version < MIN_PROTOCOL_VERSION || version > PROTOCOL_VERSION {
        return Err(Error::Protocol(format!(
            "unsupported protocol version: {}",
            version
        )));
    }
    Ok(())
}
