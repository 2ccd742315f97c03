//! Cryptographic primitives for the messaging subsystem.
//!
//! Well-audited primitives only:
//!
//! - **X25519**: pairwise key agreement between agents
//! - **Ed25519**: envelope signatures (see [`crate::identity`])
//! - **ChaCha20-Poly1305**: authenticated encryption of message plaintext
//! - **HKDF-SHA256**: expansion of the raw agreement output into AEAD keys
//!
//! Secret containers are zeroized on drop and redacted in Debug output.
//! No custom constructions.

mod aead;
mod keys;

pub use aead::{open, seal, NONCE_SIZE, TAG_SIZE};
pub use keys::{
    derive_shared_secret, Keypair, SharedSecret, X25519PublicKey, X25519_KEY_SIZE,
};

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Key size for ChaCha20-Poly1305.
pub const KEY_SIZE: usize = 32;

/// Derive key material with HKDF-SHA256.
pub fn hkdf_derive(
    salt: Option<&[u8]>,
    input_key_material: &[u8],
    info: &[u8],
    output_length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = Zeroizing::new(vec![0u8; output_length]);
    hkdf.expand(info, &mut output)
        .map_err(|_| Error::Encryption("key derivation failed".into()))?;
    Ok(output)
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Constant-time comparison of byte slices.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_is_deterministic_and_domain_separated() {
        let ikm = b"raw agreement output";
        let salt = b"salt";

        let out1 = hkdf_derive(Some(salt), ikm, b"agentlink aead v1", 32).expect("should derive");
        let out2 = hkdf_derive(Some(salt), ikm, b"agentlink aead v1", 32).expect("should derive");
        assert_eq!(&*out1, &*out2);
        assert_eq!(out1.len(), 32);

        let out3 = hkdf_derive(Some(salt), ikm, b"other context", 32).expect("should derive");
        assert_ne!(&*out1, &*out3);
    }

    #[test]
    fn random_bytes_differ_between_calls() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"diff"));
        assert!(!constant_time_eq(b"same", b"longer"));
    }
}
