//! Conversation identification and tracking.
//!
//! A conversation is the exchange between exactly two agents. Its id is
//! derived from the unordered pair of agent ids, so both ends compute the
//! same tag independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::message::AgentMessage;
use crate::error::Result;
use crate::storage::KeyValueStorage;

/// Separator between the sorted participant ids.
pub const CONVERSATION_SEPARATOR: &str = "-";

/// Most recent messages kept per conversation.
pub const MAX_HISTORY_MESSAGES: usize = 200;

/// Derive the conversation id for a pair of agents.
///
/// Sorts the ids lexicographically and joins them, so
/// `conversation_id(a, b) == conversation_id(b, a)` for every pair.
pub fn conversation_id(agent_id: &str, other_agent_id: &str) -> String {
    let (first, second) = if agent_id <= other_agent_id {
        (agent_id, other_agent_id)
    } else {
        (other_agent_id, agent_id)
    };
    format!("{first}{CONVERSATION_SEPARATOR}{second}")
}

fn history_key(conversation_id: &str) -> String {
    format!("agentlink.history.{conversation_id}")
}

/// In-memory context for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Derived conversation id.
    pub conversation_id: String,
    /// Participant ids, lexicographically sorted.
    pub participants: (String, String),
    /// Epoch milliseconds when first seen.
    pub created_at: i64,
    /// Epoch milliseconds of the latest message.
    pub last_message_at: i64,
    /// Messages recorded so far, in both directions.
    pub message_count: u64,
}

impl Conversation {
    fn between(agent_id: &str, other_agent_id: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        let (first, second) = if agent_id <= other_agent_id {
            (agent_id, other_agent_id)
        } else {
            (other_agent_id, agent_id)
        };
        Self {
            conversation_id: conversation_id(first, second),
            participants: (first.to_string(), second.to_string()),
            created_at: now,
            last_message_at: now,
            message_count: 0,
        }
    }
}

/// Tracks conversations for one local agent and records their history
/// through the storage collaborator.
pub struct ConversationRegistry {
    local_agent_id: String,
    storage: Arc<dyn KeyValueStorage>,
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl ConversationRegistry {
    /// Create a registry for `local_agent_id`.
    pub fn new(local_agent_id: impl Into<String>, storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            local_agent_id: local_agent_id.into(),
            storage,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// The conversation id for traffic with `peer_id`.
    pub fn conversation_with(&self, peer_id: &str) -> String {
        conversation_id(&self.local_agent_id, peer_id)
    }

    /// The remote participant of `message`, relative to the local agent.
    pub fn peer_of<'a>(&self, message: &'a AgentMessage) -> &'a str {
        if message.sender_id == self.local_agent_id {
            &message.recipient_id
        } else {
            &message.sender_id
        }
    }

    /// Get or create the conversation with `peer_id`.
    pub async fn open(&self, peer_id: &str) -> Conversation {
        let id = self.conversation_with(peer_id);
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(id)
            .or_insert_with(|| {
                debug!(peer_id, "opening conversation");
                Conversation::between(&self.local_agent_id, peer_id)
            })
            .clone()
    }

    /// Record a sent or received message: bumps the in-memory context and
    /// appends to the capped persisted history.
    pub async fn record(&self, message: &AgentMessage) -> Result<()> {
        {
            let mut conversations = self.conversations.write().await;
            let entry = conversations
                .entry(message.conversation_id.clone())
                .or_insert_with(|| {
                    Conversation::between(&message.sender_id, &message.recipient_id)
                });
            entry.message_count += 1;
            entry.last_message_at = message.timestamp.max(entry.last_message_at);
        }

        let key = history_key(&message.conversation_id);
        let mut history = match self.storage.get_item(&key).await? {
            Some(raw) => serde_json::from_str::<Vec<AgentMessage>>(&raw)?,
            None => Vec::new(),
        };
        history.push(message.clone());
        if history.len() > MAX_HISTORY_MESSAGES {
            let excess = history.len() - MAX_HISTORY_MESSAGES;
            history.drain(..excess);
        }
        self.storage
            .set_item(&key, &serde_json::to_string(&history)?)
            .await
    }

    /// Persisted history for `conversation_id`, oldest first.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<AgentMessage>> {
        let raw = self.storage.get_item(&history_key(conversation_id)).await?;
        match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(crate::error::Error::from),
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of the known conversations.
    pub async fn list(&self) -> Vec<Conversation> {
        let conversations = self.conversations.read().await;
        let mut all: Vec<_> = conversations.values().cloned().collect();
        all.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        all
    }
}
