//! Wire event types and frame payload definitions.
//!
//! Every frame on the channel is `{eventType, payload}` in JSON. This module
//! defines the thirteen recognized event types and the typed payload carried
//! under each control event. Message envelopes themselves live in
//! [`crate::messaging::codec`]; hellos and control payloads are defined here.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::crypto::X25519PublicKey;
use crate::error::{Error, Result};
use crate::identity::{AgentIdentity, SigningKeypair, SigningPublicKey};
use crate::logging::RedactedToken;

/// Serde helper for 64-byte Ed25519 signatures, hex-encoded in JSON.
mod serde_signature {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let vec = hex::decode(&s).map_err(serde::de::Error::custom)?;
        vec.try_into()
            .map_err(|_| serde::de::Error::custom("invalid signature length"))
    }
}

/// The recognized event/message types.
///
/// `QUERY` through `REJECTION` and `HANDSHAKE` identify agent messages;
/// the rest are control events. Unknown strings fail frame decoding with a
/// protocol error and the frame is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Peer identity exchange (hello frames and key announcements).
    Handshake,
    /// A question or request for information.
    Query,
    /// An answer to a prior query.
    Response,
    /// A negotiation proposal.
    Proposal,
    /// Acceptance of a proposal.
    Confirmation,
    /// Refusal of a proposal.
    Rejection,
    /// Liveness signal.
    Heartbeat,
    /// Delivery acknowledgment.
    Ack,
    /// Presence update.
    Presence,
    /// Typing indicator.
    Typing,
    /// Connection established (auth frames and local lifecycle event).
    Connect,
    /// Connection closed.
    Disconnect,
    /// Remote or local error report.
    Error,
}

impl EventType {
    /// Wire tag for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Handshake => "HANDSHAKE",
            EventType::Query => "QUERY",
            EventType::Response => "RESPONSE",
            EventType::Proposal => "PROPOSAL",
            EventType::Confirmation => "CONFIRMATION",
            EventType::Rejection => "REJECTION",
            EventType::Heartbeat => "HEARTBEAT",
            EventType::Ack => "ACK",
            EventType::Presence => "PRESENCE",
            EventType::Typing => "TYPING",
            EventType::Connect => "CONNECT",
            EventType::Disconnect => "DISCONNECT",
            EventType::Error => "ERROR",
        }
    }

    /// True for event types whose frames carry an encrypted envelope.
    pub fn carries_envelope(&self) -> bool {
        matches!(
            self,
            EventType::Query
                | EventType::Response
                | EventType::Proposal
                | EventType::Confirmation
                | EventType::Rejection
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auth handshake payload, client to broker.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// Opaque bearer token from the token service.
    pub token: String,
    /// The connecting agent's id.
    pub agent_id: String,
    /// The agent's X25519 public key, hex-encoded, registered with the
    /// remote side so peers can derive shared secrets.
    pub public_key: String,
}

impl AuthPayload {
    /// Whether the mandatory fields are present. Incomplete payloads are
    /// rejected before any transport attempt.
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.agent_id.is_empty()
    }
}

impl fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPayload")
            .field("token", &RedactedToken(&self.token))
            .field("agent_id", &self.agent_id)
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Auth handshake result, broker to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// Whether the handshake succeeded.
    pub authenticated: bool,
    /// The authenticated user, empty when rejected.
    #[serde(default)]
    pub user_id: String,
    /// The authenticated agent, empty when rejected.
    #[serde(default)]
    pub agent_id: String,
    /// Rejection reason, absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthResult {
    /// A rejected result carrying `error`.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            user_id: String::new(),
            agent_id: String::new(),
            error: Some(error.into()),
        }
    }

    /// An accepted result for `user_id`/`agent_id`.
    pub fn accepted(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            error: None,
        }
    }
}

/// Self-signed identity announcement for first contact between agents.
///
/// The signature covers the hello with its signature field zeroed and
/// verifies against the announced signing key, binding the announcement to
/// whoever controls that key. Receivers pin on first use; a changed key for
/// an already-pinned peer is rejected (rotation goes through an encrypted
/// key announcement instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedHello {
    /// The announcing agent.
    pub agent_id: String,
    /// The agent this hello is addressed to.
    pub recipient_id: String,
    /// X25519 public key for key agreement.
    pub public_key: X25519PublicKey,
    /// Ed25519 public key for envelope signatures.
    pub signing_public_key: SigningPublicKey,
    /// Epoch milliseconds at signing time.
    pub timestamp: i64,
    /// Ed25519 signature over the hello with this field zeroed.
    #[serde(with = "serde_signature")]
    pub signature: [u8; 64],
}

impl SignedHello {
    /// Build and sign a hello announcing `identity` to `recipient_id`.
    pub fn new_signed(
        identity: &AgentIdentity,
        keys: &SigningKeypair,
        recipient_id: impl Into<String>,
    ) -> Result<Self> {
        let mut hello = Self {
            agent_id: identity.agent_id.clone(),
            recipient_id: recipient_id.into(),
            public_key: identity.public_key.clone(),
            signing_public_key: identity.signing_public_key,
            timestamp: Utc::now().timestamp_millis(),
            signature: [0u8; 64],
        };
        let signature = ed25519_dalek::Signer::sign(keys.signing_key(), &hello.signable_bytes()?);
        hello.signature = signature.to_bytes();
        Ok(hello)
    }

    /// Verify the self-signature. Fails with an integrity error when the
    /// hello was altered or the key does not match the signature.
    pub fn verify(&self) -> Result<()> {
        let verifier = self.signing_public_key.to_verifying_key()?;
        let signature = ed25519_dalek::Signature::from_bytes(&self.signature);
        let mut cleared = self.clone();
        cleared.signature = [0u8; 64];
        verifier
            .verify_strict(&cleared.signable_bytes()?, &signature)
            .map_err(|_| Error::Integrity("hello signature rejected".into()))
    }

    /// The announced public identity.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity::new(
            self.agent_id.clone(),
            self.public_key.clone(),
            self.signing_public_key,
        )
    }

    fn signable_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }
}

/// Delivery acknowledgment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// The acknowledged message.
    pub message_id: uuid::Uuid,
    /// Conversation the message belonged to.
    pub conversation_id: String,
    /// The acknowledging agent.
    pub agent_id: String,
    /// Epoch milliseconds at acknowledgment time.
    pub timestamp: i64,
}

/// Presence status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    /// Agent online and responsive.
    Online,
    /// Agent connected but inactive.
    Away,
    /// Agent online, negotiations deferred.
    Busy,
    /// Agent going offline.
    Offline,
}

/// Presence update payload. Fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// The agent whose presence changed.
    pub agent_id: String,
    /// New status.
    pub status: PresenceStatus,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Typing indicator payload. Fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Conversation the indicator applies to.
    pub conversation_id: String,
    /// The agent that is (or stopped) typing.
    pub agent_id: String,
    /// True while composing.
    pub is_typing: bool,
}

/// Liveness signal payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    /// The emitting agent.
    pub agent_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Clean shutdown notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    /// Why the connection is closing.
    pub reason: String,
}

/// Error report payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description. Sanitized before logging.
    pub message: String,
}
