//! Agent message types.
//!
//! An [`AgentMessage`] is the plaintext unit of conversation between two
//! agents. It only ever crosses the transport as an encrypted envelope; see
//! [`crate::messaging::codec`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::conversation;
use crate::crypto::X25519PublicKey;
use crate::error::{Error, Result};
use crate::identity::SigningPublicKey;
use crate::protocol::EventType;
use crate::MAX_MESSAGE_SIZE;

/// Message priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// Default.
    Normal,
    /// Time-sensitive.
    High,
    /// Requires immediate attention.
    Urgent,
}

/// Delivery hints attached to every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Priority hint for the receiving agent.
    pub priority: Priority,
    /// Epoch milliseconds after which the message is stale, if any.
    pub expires_at: Option<i64>,
    /// Whether the body travels encrypted. Always true on the send path.
    pub encrypted: bool,
    /// Whether the sender expects a `RESPONSE`.
    pub requires_response: bool,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            expires_at: None,
            encrypted: true,
            requires_response: false,
        }
    }
}

/// Message body, one shape per message type.
///
/// The wire form is `"messageType"` plus a matching `"content"` object;
/// unknown types fail decoding and the message is dropped as malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "messageType",
    content = "content",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum MessageContent {
    /// Key announcement inside an established conversation. Because it
    /// arrives encrypted and signed under the currently pinned keys, the
    /// receiver may re-pin to the announced keys.
    Handshake {
        /// The announcing agent.
        agent_id: String,
        /// Replacement key-agreement key.
        public_key: X25519PublicKey,
        /// Replacement signing key.
        signing_public_key: SigningPublicKey,
    },
    /// A question or request for information.
    Query {
        /// Natural-language question.
        text: String,
        /// Structured parameters, free-form.
        data: Option<Value>,
    },
    /// An answer to a prior query.
    Response {
        /// The query being answered.
        in_reply_to: Uuid,
        /// Natural-language answer.
        text: String,
        /// Structured results, free-form.
        data: Option<Value>,
    },
    /// A negotiation proposal.
    Proposal {
        /// One-line summary.
        summary: String,
        /// Proposal body, free-form.
        details: Value,
    },
    /// Acceptance of a proposal.
    Confirmation {
        /// The accepted proposal message.
        proposal_id: Uuid,
        /// Optional note to the proposer.
        note: Option<String>,
    },
    /// Refusal of a proposal.
    Rejection {
        /// The refused proposal message.
        proposal_id: Uuid,
        /// Why it was refused.
        reason: String,
    },
}

impl MessageContent {
    /// The wire event type carrying this content.
    pub fn event_type(&self) -> EventType {
        match self {
            MessageContent::Handshake { .. } => EventType::Handshake,
            MessageContent::Query { .. } => EventType::Query,
            MessageContent::Response { .. } => EventType::Response,
            MessageContent::Proposal { .. } => EventType::Proposal,
            MessageContent::Confirmation { .. } => EventType::Confirmation,
            MessageContent::Rejection { .. } => EventType::Rejection,
        }
    }
}

/// A complete agent-to-agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    /// Globally unique id, the acknowledgment correlation key.
    pub message_id: Uuid,
    /// Conversation tag, derived from the two participant ids.
    pub conversation_id: String,
    /// Originating agent.
    pub sender_id: String,
    /// Destination agent.
    pub recipient_id: String,
    /// Typed body; contributes `messageType` and `content` on the wire.
    #[serde(flatten)]
    pub content: MessageContent,
    /// Epoch milliseconds at creation time.
    pub timestamp: i64,
    /// Delivery hints.
    pub metadata: MessageMetadata,
}

impl AgentMessage {
    /// Build a message from `sender_id` to `recipient_id`, tagging it with
    /// the conversation derived from the pair.
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        content: MessageContent,
    ) -> Self {
        let sender_id = sender_id.into();
        let recipient_id = recipient_id.into();
        Self {
            message_id: Uuid::new_v4(),
            conversation_id: conversation::conversation_id(&sender_id, &recipient_id),
            sender_id,
            recipient_id,
            content,
            timestamp: Utc::now().timestamp_millis(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Set the priority hint.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Set an expiry deadline in epoch milliseconds.
    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.metadata.expires_at = Some(expires_at);
        self
    }

    /// Mark that the sender expects a `RESPONSE`.
    pub fn with_requires_response(mut self) -> Self {
        self.metadata.requires_response = true;
        self
    }

    /// The wire event type for this message.
    pub fn event_type(&self) -> EventType {
        self.content.event_type()
    }

    /// Whether the expiry deadline, if any, has passed.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.metadata.expires_at, Some(deadline) if now_ms > deadline)
    }

    /// Validate required fields and tag consistency.
    ///
    /// Messages failing validation are rejected on the send path and
    /// dropped on the receive path.
    pub fn validate(&self) -> Result<()> {
        if self.message_id.is_nil() {
            return Err(Error::Protocol("message id is required".into()));
        }
        if self.sender_id.is_empty() || self.recipient_id.is_empty() {
            return Err(Error::Protocol(
                "sender and recipient ids are required".into(),
            ));
        }
        let expected = conversation::conversation_id(&self.sender_id, &self.recipient_id);
        if self.conversation_id != expected {
            return Err(Error::Protocol(
                "conversation id does not match participants".into(),
            ));
        }
        Ok(())
    }

    /// Serialize for encryption.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::Protocol("message too large".into()));
        }
        Ok(bytes)
    }

    /// Deserialize a decrypted plaintext. The size cap applies on this path
    /// too, so an oversized message is rejected no matter which end built it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::Protocol("message too large".into()));
        }
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(sender: &str, recipient: &str) -> AgentMessage {
        AgentMessage::new(
            sender,
            recipient,
            MessageContent::Query {
                text: "free slots tomorrow?".into(),
                data: None,
            },
        )
    }

    #[test]
    fn new_message_has_sane_defaults() {
        let msg = query("alice-1", "bob-2");

        assert!(!msg.message_id.is_nil());
        assert_eq!(msg.conversation_id, "alice-1-bob-2");
        assert_eq!(msg.event_type(), EventType::Query);
        assert_eq!(msg.metadata.priority, Priority::Normal);
        assert!(msg.metadata.encrypted);
        assert!(!msg.metadata.requires_response);
        msg.validate().expect("valid");
    }

    #[test]
    fn conversation_tag_ignores_direction() {
        let forward = query("alice-1", "bob-2");
        let reverse = query("bob-2", "alice-1");
        assert_eq!(forward.conversation_id, reverse.conversation_id);
    }

    #[test]
    fn wire_shape_puts_message_type_at_top_level() {
        let msg = query("alice-1", "bob-2").with_priority(Priority::High);
        let json = serde_json::to_value(&msg).expect("serialize");

        assert_eq!(json["messageType"], "QUERY");
        assert_eq!(json["content"]["text"], "free slots tomorrow?");
        assert_eq!(json["senderId"], "alice-1");
        assert_eq!(json["metadata"]["priority"], "HIGH");
    }

    #[test]
    fn messages_round_trip_through_bytes() {
        let msg = AgentMessage::new(
            "alice-1",
            "bob-2",
            MessageContent::Proposal {
                summary: "meet tuesday 10:00".into(),
                details: serde_json::json!({"slot": "2026-09-01T10:00:00Z"}),
            },
        )
        .with_requires_response();

        let bytes = msg.to_bytes().expect("serialize");
        let back = AgentMessage::from_bytes(&bytes).expect("parse");
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut json = serde_json::to_value(query("alice-1", "bob-2")).expect("serialize");
        json["messageType"] = "GOSSIP".into();
        let bytes = serde_json::to_vec(&json).expect("bytes");
        assert!(AgentMessage::from_bytes(&bytes).is_err());
    }

    #[test]
    fn validation_rejects_missing_participants() {
        let mut msg = query("alice-1", "bob-2");
        msg.recipient_id.clear();
        assert!(matches!(msg.validate(), Err(Error::Protocol(_))));
    }

    #[test]
    fn validation_rejects_mismatched_conversation_tag() {
        let mut msg = query("alice-1", "bob-2");
        msg.conversation_id = "alice-1-carol-3".into();
        assert!(matches!(msg.validate(), Err(Error::Protocol(_))));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let msg = AgentMessage::new(
            "alice-1",
            "bob-2",
            MessageContent::Query {
                text: "x".repeat(MAX_MESSAGE_SIZE),
                data: None,
            },
        );
        assert!(matches!(msg.to_bytes(), Err(Error::Protocol(_))));
    }

    #[test]
    fn oversized_plaintext_is_rejected_on_parse() {
        let mut json = serde_json::to_value(query("alice-1", "bob-2")).expect("serialize");
        json["content"]["text"] = "x".repeat(MAX_MESSAGE_SIZE).into();
        let bytes = serde_json::to_vec(&json).expect("bytes");
        assert!(matches!(
            AgentMessage::from_bytes(&bytes),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn expiry_deadline_is_honored() {
        let msg = query("alice-1", "bob-2").with_expires_at(1_000);
        assert!(msg.is_expired(1_001));
        assert!(!msg.is_expired(1_000));

        let open_ended = query("alice-1", "bob-2");
        assert!(!open_ended.is_expired(i64::MAX));
    }
}
