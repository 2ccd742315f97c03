//! Frame encoding and decoding.
//!
//! Frames are JSON objects with strict validation. Malformed frames fail
//! with a protocol error and are dropped by the connection loop without an
//! error response.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::EventType;
use super::{validate_version, PROTOCOL_VERSION};
use crate::error::{Error, Result};
use crate::MAX_MESSAGE_SIZE;

/// Maximum encoded frame size. Envelopes hex-encode their ciphertext, so a
/// maximum-size message roughly doubles on the wire; the rest is headroom
/// for framing fields.
pub const MAX_FRAME_SIZE: usize = 4 * MAX_MESSAGE_SIZE;

/// A single channel frame: an event type plus its payload.
///
/// The `version` field is filled in by [`Frame::new`] and checked on decode;
/// frames without one are treated as version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Protocol version.
    #[serde(default = "default_version")]
    pub version: u8,
    /// What kind of event this frame carries.
    pub event_type: EventType,
    /// Event payload, shape determined by `event_type`.
    pub payload: Value,
}

fn default_version() -> u8 {
    PROTOCOL_VERSION
}

impl Frame {
    /// Build a frame from a typed payload.
    pub fn new<T: Serialize>(event_type: EventType, payload: &T) -> Result<Self> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            event_type,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload into a concrete type.
    ///
    /// Fails with a protocol error when the payload does not match the
    /// expected shape for this event type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(Error::from)
    }

    /// Serialize for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(Error::Protocol("frame too large".into()));
        }
        Ok(bytes)
    }

    /// Parse a received frame.
    ///
    /// Validates size, JSON structure, event type, and protocol version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(Error::Protocol("frame too large".into()));
        }

        let frame: Frame = serde_json::from_slice(bytes)?;
        validate_version(frame.version)?;

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::HeartbeatPayload;

    #[test]
    fn frame_roundtrip() {
        let payload = HeartbeatPayload {
            agent_id: "alice-1".into(),
            timestamp: 1_700_000_000_000,
        };
        let frame = Frame::new(EventType::Heartbeat, &payload).expect("encode");
        let bytes = frame.to_bytes().expect("serialize");

        let parsed = Frame::from_bytes(&bytes).expect("parse");
        assert_eq!(parsed.event_type, EventType::Heartbeat);

        let back: HeartbeatPayload = parsed.decode_payload().expect("payload");
        assert_eq!(back.agent_id, "alice-1");
        assert_eq!(back.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn uses_event_type_key_on_the_wire() {
        let frame = Frame::new(EventType::Typing, &serde_json::json!({})).expect("encode");
        let json: Value =
            serde_json::from_slice(&frame.to_bytes().expect("serialize")).expect("json");
        assert_eq!(json["eventType"], "TYPING");
    }

    #[test]
    fn frame_without_version_defaults_to_current() {
        let bytes = br#"{"eventType":"PRESENCE","payload":{}}"#;
        let frame = Frame::from_bytes(bytes).expect("parse");
        assert_eq!(frame.version, PROTOCOL_VERSION);
        assert_eq!(frame.event_type, EventType::Presence);
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let err = Frame::from_bytes(b"{not json").expect_err("must fail");
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("invalid JSON structure"));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let bytes = br#"{"version":1,"eventType":"TELEPORT","payload":{}}"#;
        assert!(matches!(
            Frame::from_bytes(bytes),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let bytes = br#"{"version":99,"eventType":"HEARTBEAT","payload":{}}"#;
        assert!(matches!(
            Frame::from_bytes(bytes),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let blob = "x".repeat(MAX_FRAME_SIZE);
        let frame = Frame::new(EventType::Query, &blob).expect("encode");
        assert!(matches!(frame.to_bytes(), Err(Error::Protocol(_))));
    }

    #[test]
    fn mismatched_payload_shape_fails_decode() {
        let frame = Frame::new(EventType::Heartbeat, &serde_json::json!({"bogus": true}))
            .expect("encode");
        assert!(frame.decode_payload::<HeartbeatPayload>().is_err());
    }
}
