//! Agent identity and key material.
//!
//! Every agent owns two independent keypairs: an X25519 pair for pairwise
//! key agreement and an Ed25519 pair for envelope signatures. The public
//! halves travel as [`AgentIdentity`]; the private halves never leave this
//! module and the message codec.
//!
//! Fingerprints are SHA-256 over the signing public key, hex-encoded, for
//! out-of-band verification between principals.

mod manager;

pub use manager::KeyManager;

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

use crate::crypto::{Keypair, X25519PublicKey};
use crate::error::{Error, Result};

/// Size of Ed25519 keys in bytes.
pub const ED25519_KEY_SIZE: usize = 32;

/// Generate a fresh confidentiality keypair (X25519).
pub fn generate_keypair() -> Keypair {
    Keypair::generate()
}

/// Generate a fresh signing keypair (Ed25519), independent of the
/// confidentiality pair.
pub fn generate_signing_keypair() -> SigningKeypair {
    SigningKeypair::generate()
}

/// An Ed25519 signing keypair. The secret is zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct SigningKeypair {
    #[zeroize(skip)]
    signing: SigningKey,
}

impl SigningKeypair {
    /// Generate a new random signing keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore from secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; ED25519_KEY_SIZE]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&bytes),
        }
    }

    /// The public half.
    pub fn public_key(&self) -> SigningPublicKey {
        SigningPublicKey(self.signing.verifying_key().to_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub(crate) fn secret_bytes(&self) -> [u8; ED25519_KEY_SIZE] {
        self.signing.to_bytes()
    }
}

impl fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("public", &self.public_key())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// An Ed25519 public key. Serializes as a hex string.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPublicKey(#[serde(with = "hex_key")] [u8; ED25519_KEY_SIZE]);

impl SigningPublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; ED25519_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ED25519_KEY_SIZE] {
        &self.0
    }

    /// Hex encoding for wire payloads.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Convert into a dalek verifying key, rejecting off-curve bytes.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0)
            .map_err(|_| Error::Encryption("malformed signing key".into()))
    }
}

impl fmt::Debug for SigningPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningPublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

/// The public identity of an agent: its id plus both public keys.
///
/// This is what peers exchange and pin. Private counterparts stay inside
/// [`KeyManager`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Stable agent identifier, e.g. `"alice-1"`.
    pub agent_id: String,
    /// X25519 public key for key agreement.
    pub public_key: X25519PublicKey,
    /// Ed25519 public key for envelope signatures.
    pub signing_public_key: SigningPublicKey,
}

impl AgentIdentity {
    /// Assemble an identity from its public parts.
    pub fn new(
        agent_id: impl Into<String>,
        public_key: X25519PublicKey,
        signing_public_key: SigningPublicKey,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            public_key,
            signing_public_key,
        }
    }

    /// SHA-256 fingerprint of the signing public key, hex-encoded.
    pub fn fingerprint(&self) -> String {
        compute_fingerprint(self.signing_public_key.as_bytes())
    }
}

/// Compute the SHA-256 fingerprint of public key bytes.
pub fn compute_fingerprint(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

/// Format a fingerprint for display: groups of 4 characters for verbal
/// comparison, e.g. `"a1b2 c3d4 …"`.
pub fn format_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Serde helper: Ed25519 key bytes as hex strings.
mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let vec = hex::decode(&s).map_err(serde::de::Error::custom)?;
        vec.try_into()
            .map_err(|_| serde::de::Error::custom("invalid key length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity(agent_id: &str) -> AgentIdentity {
        AgentIdentity::new(
            agent_id,
            generate_keypair().public_key().clone(),
            generate_signing_keypair().public_key(),
        )
    }

    #[test]
    fn generated_keypairs_are_independent() {
        let kp = generate_keypair();
        let sk = generate_signing_keypair();
        assert_ne!(kp.public_key().as_bytes(), sk.public_key().as_bytes());
    }

    #[test]
    fn signing_keypair_round_trips_through_secret_bytes() {
        let original = generate_signing_keypair();
        let restored = SigningKeypair::from_secret_bytes(original.secret_bytes());
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let identity = test_identity("alice-1");
        let fp = identity.fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));

        // Stable for the same key, distinct across keys.
        assert_eq!(fp, identity.fingerprint());
        assert_ne!(fp, test_identity("alice-1").fingerprint());
    }

    #[test]
    fn fingerprint_formatting_groups_by_four() {
        let fp = "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2";
        let formatted = format_fingerprint(fp);
        assert_eq!(formatted.split(' ').count(), 16);
        assert!(formatted.starts_with("a1b2 c3d4"));
    }

    #[test]
    fn identity_serializes_with_hex_keys() {
        let identity = test_identity("alice-1");
        let json = serde_json::to_string(&identity).expect("serialize");
        assert!(json.contains(&identity.public_key.to_hex()));
        assert!(json.contains(&identity.signing_public_key.to_hex()));

        let back: AgentIdentity = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, identity);
    }

    #[test]
    fn signing_public_key_converts_to_verifier() {
        let sk = generate_signing_keypair();
        let verifier = sk.public_key().to_verifying_key().expect("valid key");
        assert_eq!(verifier.to_bytes(), *sk.public_key().as_bytes());
    }

    #[test]
    fn debug_output_redacts_secret_half() {
        let sk = generate_signing_keypair();
        let debug = format!("{:?}", sk);
        assert!(debug.contains("[REDACTED]"));
    }
}
