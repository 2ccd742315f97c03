//! Authenticated encryption with ChaCha20-Poly1305.
//!
//! Message plaintext is sealed with a fresh random nonce on every call, so
//! equal inputs never produce equal ciphertext. The associated data binds
//! envelope routing fields to the ciphertext so a valid envelope cannot be
//! replayed under different addressing.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use super::KEY_SIZE;
use crate::error::{Error, Result};

/// Size of the nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Encrypt plaintext under `key` with a fresh random nonce.
///
/// Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Encryption("encryption failed".into()))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt data produced by [`seal`].
///
/// The plaintext comes back in a zeroized container. Failures are reported
/// with a generic error; callers never learn whether the nonce, tag, or
/// associated data was at fault.
pub fn open(
    key: &[u8; KEY_SIZE],
    data: &[u8],
    associated_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Encryption("ciphertext too short".into()));
    }

    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &data[NONCE_SIZE..],
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Encryption("decryption failed".into()))?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [42u8; KEY_SIZE];
        let plaintext = b"meet tuesday at 14:00?";
        let aad = b"m-1|alice-1|bob-2";

        let sealed = seal(&key, plaintext, aad).expect("seal");
        assert_eq!(sealed.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let opened = open(&key, &sealed, aad).expect("open");
        assert_eq!(&*opened, plaintext);
    }

    #[test]
    fn nonce_is_random_per_call() {
        let key = [42u8; KEY_SIZE];
        let a = seal(&key, b"same input", b"").expect("seal");
        let b = seal(&key, b"same input", b"").expect("seal");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&[1u8; KEY_SIZE], b"secret", b"").expect("seal");
        assert!(open(&[2u8; KEY_SIZE], &sealed, b"").is_err());
    }

    #[test]
    fn wrong_aad_fails() {
        let key = [42u8; KEY_SIZE];
        let sealed = seal(&key, b"secret", b"envelope-a").expect("seal");
        assert!(open(&key, &sealed, b"envelope-b").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [42u8; KEY_SIZE];
        let mut sealed = seal(&key, b"secret", b"").expect("seal");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&key, &sealed, b"").is_err());
    }

    #[test]
    fn truncated_input_fails_before_decrypting() {
        let key = [42u8; KEY_SIZE];
        assert!(matches!(
            open(&key, &[0u8; NONCE_SIZE + TAG_SIZE - 1], b""),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn empty_plaintext_is_valid() {
        let key = [42u8; KEY_SIZE];
        let sealed = seal(&key, b"", b"aad").expect("seal");
        let opened = open(&key, &sealed, b"aad").expect("open");
        assert!(opened.is_empty());
    }
}
