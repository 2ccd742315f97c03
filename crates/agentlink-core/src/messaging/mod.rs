//! Agent-to-agent messaging.
//!
//! Everything above the wire protocol lives here: typed message content,
//! the encrypt/sign codec, conversation bookkeeping, event dispatch,
//! acknowledgement tracking, peer pinning, and the connection manager that
//! ties them together.
//!
//! All agent messages are end-to-end encrypted and signed; the broker that
//! relays frames never sees plaintext.

mod client;
mod codec;
mod conversation;
mod delivery;
mod handlers;
mod message;
mod peers;

pub use client::{ConnectionState, MessagingClient};
pub use codec::{decrypt, encrypt, EncryptedEnvelope};
pub use conversation::{
    conversation_id, Conversation, ConversationRegistry, CONVERSATION_SEPARATOR,
    MAX_HISTORY_MESSAGES,
};
pub use delivery::{DeliveryStatus, DeliveryTracker, PendingDelivery};
pub use handlers::{DispatchStats, Event, EventHandler, HandlerRegistry};
pub use message::{AgentMessage, MessageContent, MessageMetadata, Priority};
pub use peers::PeerDirectory;
