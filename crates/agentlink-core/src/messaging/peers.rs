//! Pinned peer identities.
//!
//! Peers announce their keys in signed hellos; the first verified
//! announcement is pinned and persisted. Whether a later announcement may
//! replace a pin is the connection manager's decision, not this store's.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::identity::{format_fingerprint, AgentIdentity};
use crate::storage::KeyValueStorage;

fn peer_key(agent_id: &str) -> String {
    format!("agentlink.peer.{agent_id}")
}

/// Persistent store of pinned peer identities with an in-memory cache.
pub struct PeerDirectory {
    storage: Arc<dyn KeyValueStorage>,
    cache: RwLock<HashMap<String, AgentIdentity>>,
}

impl PeerDirectory {
    /// Create a directory backed by `storage`.
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The pinned identity for `agent_id`, if any.
    pub async fn lookup(&self, agent_id: &str) -> Result<Option<AgentIdentity>> {
        if let Some(identity) = self.cache.read().await.get(agent_id) {
            return Ok(Some(identity.clone()));
        }

        let Some(raw) = self.storage.get_item(&peer_key(agent_id)).await? else {
            return Ok(None);
        };
        let identity: AgentIdentity = serde_json::from_str(&raw)
            .map_err(|_| Error::Storage("corrupt peer record".into()))?;

        self.cache
            .write()
            .await
            .insert(agent_id.to_string(), identity.clone());
        Ok(Some(identity))
    }

    /// Whether an identity is pinned for `agent_id`.
    pub async fn is_pinned(&self, agent_id: &str) -> Result<bool> {
        Ok(self.lookup(agent_id).await?.is_some())
    }

    /// Pin `identity`, replacing any previous pin for the same agent.
    pub async fn pin(&self, identity: AgentIdentity) -> Result<()> {
        info!(
            agent_id = %identity.agent_id,
            fingerprint = %format_fingerprint(&identity.fingerprint()),
            "pinning peer identity"
        );
        self.storage
            .set_item(&peer_key(&identity.agent_id), &serde_json::to_string(&identity)?)
            .await?;
        self.cache
            .write()
            .await
            .insert(identity.agent_id.clone(), identity);
        Ok(())
    }

    /// Agent ids with a cached pin. Used to address key announcements.
    pub async fn pinned_ids(&self) -> Vec<String> {
        self.cache.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::identity::generate_signing_keypair;
    use crate::storage::MemoryStorage;

    fn identity(agent_id: &str) -> AgentIdentity {
        AgentIdentity::new(
            agent_id,
            Keypair::generate().public_key().clone(),
            generate_signing_keypair().public_key(),
        )
    }

    #[tokio::test]
    async fn pin_then_lookup() {
        let directory = PeerDirectory::new(Arc::new(MemoryStorage::new()));
        let bob = identity("bob-2");

        assert!(!directory.is_pinned("bob-2").await.expect("check"));
        directory.pin(bob.clone()).await.expect("pin");

        let found = directory.lookup("bob-2").await.expect("lookup");
        assert_eq!(found, Some(bob));
        assert_eq!(directory.pinned_ids().await, vec!["bob-2".to_string()]);
    }

    #[tokio::test]
    async fn pins_survive_a_fresh_directory() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let bob = identity("bob-2");

        PeerDirectory::new(storage.clone())
            .pin(bob.clone())
            .await
            .expect("pin");

        let reloaded = PeerDirectory::new(storage);
        let found = reloaded.lookup("bob-2").await.expect("lookup");
        assert_eq!(found, Some(bob));
    }

    #[tokio::test]
    async fn re_pinning_replaces_the_identity() {
        let directory = PeerDirectory::new(Arc::new(MemoryStorage::new()));
        let old = identity("bob-2");
        let new = identity("bob-2");

        directory.pin(old.clone()).await.expect("pin old");
        directory.pin(new.clone()).await.expect("pin new");

        let found = directory.lookup("bob-2").await.expect("lookup");
        assert_eq!(found, Some(new.clone()));
        assert_ne!(found, Some(old));
    }

    #[tokio::test]
    async fn corrupt_record_is_a_storage_error() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        storage
            .set_item(&peer_key("bob-2"), "{half a record")
            .await
            .expect("seed");

        let directory = PeerDirectory::new(storage);
        assert!(matches!(
            directory.lookup("bob-2").await,
            Err(Error::Storage(_))
        ));
    }
}
