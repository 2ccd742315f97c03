//! Key manager: owns the local agent's private key material.
//!
//! Keys load from the storage collaborator at startup; when absent, fresh
//! pairs are generated and persisted before the first handshake. Nothing
//! regenerates implicitly — [`KeyManager::rotate`] is the only path to new
//! keys for an existing agent id.
//!
//! Private keys never leave this type: peers get an [`AgentIdentity`]
//! (public halves), the codec gets derived shared secrets and a borrowed
//! signing key, and the storage collaborator gets the persisted blob.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    format_fingerprint, AgentIdentity, SigningKeypair, ED25519_KEY_SIZE,
};
use crate::crypto::{derive_shared_secret, Keypair, SharedSecret, X25519PublicKey, X25519_KEY_SIZE};
use crate::error::{Error, Result};
use crate::storage::KeyValueStorage;

/// Storage key for an agent's secret key material.
fn storage_key(agent_id: &str) -> String {
    format!("agentlink.identity.{agent_id}")
}

/// Persisted secret key blob (hex fields). Exchanged only with the storage
/// collaborator; at-rest protection is the backend's concern.
#[derive(Serialize, Deserialize)]
struct PersistedKeys {
    x25519_secret: String,
    ed25519_secret: String,
}

/// Owner of the local agent's keypairs.
pub struct KeyManager {
    agent_id: String,
    confidentiality: Keypair,
    signing: SigningKeypair,
}

impl KeyManager {
    /// Load the agent's keys from storage, generating and persisting fresh
    /// pairs when none exist yet.
    pub async fn load_or_create(
        agent_id: &str,
        storage: &Arc<dyn KeyValueStorage>,
    ) -> Result<Self> {
        storage.ready().await?;
        match storage.get_item(&storage_key(agent_id)).await? {
            Some(blob) => Self::from_persisted(agent_id, &blob),
            None => {
                let manager = Self::fresh(agent_id);
                manager.persist(storage).await?;
                info!(
                    agent_id,
                    fingerprint = %format_fingerprint(&manager.identity().fingerprint()),
                    "generated new agent identity"
                );
                Ok(manager)
            }
        }
    }

    /// Generate and persist a replacement for both keypairs.
    ///
    /// The caller is responsible for announcing the new identity to pinned
    /// peers; sessions built on the old keys keep working until then.
    pub async fn rotate(agent_id: &str, storage: &Arc<dyn KeyValueStorage>) -> Result<Self> {
        let manager = Self::fresh(agent_id);
        manager.persist(storage).await?;
        info!(
            agent_id,
            fingerprint = %format_fingerprint(&manager.identity().fingerprint()),
            "rotated agent keys"
        );
        Ok(manager)
    }

    fn fresh(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            confidentiality: Keypair::generate(),
            signing: SigningKeypair::generate(),
        }
    }

    fn from_persisted(agent_id: &str, blob: &str) -> Result<Self> {
        let persisted: PersistedKeys = serde_json::from_str(blob)
            .map_err(|_| Error::Storage("corrupt identity record".into()))?;

        let x25519: [u8; X25519_KEY_SIZE] = hex::decode(&persisted.x25519_secret)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| Error::Storage("corrupt identity record".into()))?;
        let ed25519: [u8; ED25519_KEY_SIZE] = hex::decode(&persisted.ed25519_secret)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| Error::Storage("corrupt identity record".into()))?;

        Ok(Self {
            agent_id: agent_id.to_string(),
            confidentiality: Keypair::from_secret_bytes(x25519),
            signing: SigningKeypair::from_secret_bytes(ed25519),
        })
    }

    async fn persist(&self, storage: &Arc<dyn KeyValueStorage>) -> Result<()> {
        let blob = serde_json::to_string(&PersistedKeys {
            x25519_secret: hex::encode(self.confidentiality.secret_bytes()),
            ed25519_secret: hex::encode(self.signing.secret_bytes()),
        })?;
        storage.set_item(&storage_key(&self.agent_id), &blob).await
    }

    /// The agent id these keys belong to.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// The public identity peers receive and pin.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity::new(
            self.agent_id.clone(),
            self.confidentiality.public_key().clone(),
            self.signing.public_key(),
        )
    }

    /// Derive the pairwise shared secret for a peer identity.
    pub fn shared_secret_for(&self, peer: &AgentIdentity) -> Result<SharedSecret> {
        derive_shared_secret(&self.confidentiality, &peer.public_key)
    }

    /// Derive the pairwise shared secret from a bare peer key.
    pub fn shared_secret_with(&self, peer_key: &X25519PublicKey) -> Result<SharedSecret> {
        derive_shared_secret(&self.confidentiality, peer_key)
    }

    pub(crate) fn signing_keypair(&self) -> &SigningKeypair {
        &self.signing
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("agent_id", &self.agent_id)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}
