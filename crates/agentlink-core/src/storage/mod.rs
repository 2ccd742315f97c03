//! The persistence collaborator contract.
//!
//! The messaging subsystem never assumes a storage engine. It persists
//! keypairs and conversation history through this key/value contract and
//! nothing else; hosts inject whichever backend they run on.

mod sqlite;

pub use sqlite::SqliteStorage;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Key/value persistence contract.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Initialization guard. Callers invoke this once before first use;
    /// backends that need setup (schema, migrations) do it here.
    async fn ready(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory storage. Nothing survives the process; intended for tests and
/// ephemeral deployments.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.items.read().await;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.write().await;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
