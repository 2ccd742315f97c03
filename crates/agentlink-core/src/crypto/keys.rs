//! X25519 key types for pairwise key agreement.
//!
//! Each agent carries one long-term confidentiality keypair; the shared
//! secret for a peer comes out of a single static-static Diffie-Hellman.
//! All secret material is zeroized on drop.

use std::fmt;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of X25519 keys in bytes.
pub const X25519_KEY_SIZE: usize = 32;

/// An X25519 public key. Serializes as a hex string so it can ride inside
/// JSON frames.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct X25519PublicKey(#[serde(with = "serde_hex")] [u8; X25519_KEY_SIZE]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a hex string, as carried in auth payloads and hellos.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::Encryption("malformed public key".into()))?;
        Self::try_from(bytes.as_slice())
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }

    /// Hex encoding for wire payloads.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn to_dalek(&self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl TryFrom<&[u8]> for X25519PublicKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; X25519_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Encryption("malformed public key".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the first 8 bytes; full keys belong in fingerprint output.
        write!(f, "X25519PublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(key: PublicKey) -> Self {
        Self(*key.as_bytes())
    }
}

/// A shared secret from X25519 key agreement. Zeroized on drop.
///
/// This is raw agreement output, not yet an AEAD key; the codec expands it
/// with HKDF before use.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; X25519_KEY_SIZE]);

impl SharedSecret {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// A long-term X25519 keypair. The secret is zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct Keypair {
    #[zeroize(skip)]
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl Keypair {
    /// Generate a new random keypair from the operating system RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Restore from secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &X25519PublicKey {
        &self.public
    }

    /// Export secret key bytes for persistence.
    ///
    /// # Security
    /// Only the identity manager may call this, and only to hand the bytes
    /// to the storage collaborator.
    pub(crate) fn secret_bytes(&self) -> [u8; X25519_KEY_SIZE] {
        self.secret.to_bytes()
    }

    fn diffie_hellman(&self, their_public: &X25519PublicKey) -> x25519_dalek::SharedSecret {
        self.secret.diffie_hellman(&their_public.to_dalek())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Derive the pairwise shared secret for a peer.
///
/// Commutative: `derive_shared_secret(a, b.public)` equals
/// `derive_shared_secret(b, a.public)`. Fails with an encryption error when
/// the peer key is degenerate (non-contributory exchange).
pub fn derive_shared_secret(
    ours: &Keypair,
    their_public: &X25519PublicKey,
) -> Result<SharedSecret> {
    let shared = ours.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(Error::Encryption("key agreement failed".into()));
    }
    Ok(SharedSecret(*shared.as_bytes()))
}

/// Serde helper: fixed-size byte arrays as hex strings.
mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let vec = hex::decode(&s).map_err(serde::de::Error::custom)?;
        vec.try_into()
            .map_err(|_| serde::de::Error::custom("invalid key length"))
    }
}
