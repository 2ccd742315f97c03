//! Message encryption, signing, verification, and decryption.
//!
//! Plaintext serialization, a per-conversation message key derived from the
//! shared secret, AEAD with the envelope header as associated data, and an
//! Ed25519 signature over header plus ciphertext. Receivers verify the
//! signature before the ciphertext is touched; an envelope that fails
//! verification is discarded undecrypted.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::message::AgentMessage;
use crate::crypto::{self, SharedSecret, KEY_SIZE};
use crate::error::{Error, Result};
use crate::identity::{SigningKeypair, SigningPublicKey};

/// HKDF info label for message keys.
const MESSAGE_KEY_INFO: &[u8] = b"agentlink-message-v1";

/// Serde helper for hex-encoded byte fields.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// The only representation of an agent message that crosses the wire.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    /// Id of the enclosed message.
    pub message_id: Uuid,
    /// Conversation tag, visible for routing.
    pub conversation_id: String,
    /// Originating agent.
    pub sender_id: String,
    /// Destination agent.
    pub recipient_id: String,
    /// AEAD output: nonce, ciphertext, tag. Hex on the wire.
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    /// Ed25519 signature over header binding plus ciphertext.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Canonical byte string binding the envelope header. Used as AEAD
    /// associated data and as the signed prefix.
    fn binding(&self) -> Vec<u8> {
        binding(
            &self.message_id,
            &self.conversation_id,
            &self.sender_id,
            &self.recipient_id,
        )
    }
}

impl fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("message_id", &self.message_id)
            .field("conversation_id", &self.conversation_id)
            .field("sender_id", &self.sender_id)
            .field("recipient_id", &self.recipient_id)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

fn binding(message_id: &Uuid, conversation_id: &str, sender_id: &str, recipient_id: &str) -> Vec<u8> {
    format!("{message_id}|{conversation_id}|{sender_id}|{recipient_id}").into_bytes()
}

fn message_key(shared_secret: &SharedSecret, conversation_id: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let okm = crypto::hkdf_derive(
        Some(conversation_id.as_bytes()),
        shared_secret.as_bytes(),
        MESSAGE_KEY_INFO,
        KEY_SIZE,
    )?;
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&okm);
    Ok(key)
}

/// Encrypt and sign `message` for transmission.
///
/// The nonce is random per call, so equal inputs produce different
/// ciphertext; the signature always validates against the sender's
/// signing key.
pub fn encrypt(
    message: &AgentMessage,
    shared_secret: &SharedSecret,
    signing_keys: &SigningKeypair,
) -> Result<EncryptedEnvelope> {
    message.validate()?;

    let plaintext = Zeroizing::new(message.to_bytes()?);
    let header = binding(
        &message.message_id,
        &message.conversation_id,
        &message.sender_id,
        &message.recipient_id,
    );

    let key = message_key(shared_secret, &message.conversation_id)?;
    let ciphertext = crypto::seal(&key, &plaintext, &header)?;

    let mut signed = header;
    signed.extend_from_slice(&ciphertext);
    let signature = ed25519_dalek::Signer::sign(signing_keys.signing_key(), &signed);

    Ok(EncryptedEnvelope {
        message_id: message.message_id,
        conversation_id: message.conversation_id.clone(),
        sender_id: message.sender_id.clone(),
        recipient_id: message.recipient_id.clone(),
        ciphertext,
        signature: signature.to_bytes().to_vec(),
    })
}

/// Verify and decrypt an inbound envelope.
///
/// Signature verification comes first; a bad signature discards the
/// envelope without any decryption attempt. Plaintext that fails to parse
/// or disagrees with the envelope header is a protocol violation.
pub fn decrypt(
    envelope: &EncryptedEnvelope,
    shared_secret: &SharedSecret,
    signing_public_key: &SigningPublicKey,
) -> Result<AgentMessage> {
    let signature_bytes: [u8; 64] = envelope
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| Error::Integrity("malformed envelope signature".into()))?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);
    let verifier = signing_public_key.to_verifying_key()?;

    let header = envelope.binding();
    let mut signed = header.clone();
    signed.extend_from_slice(&envelope.ciphertext);
    verifier
        .verify_strict(&signed, &signature)
        .map_err(|_| Error::Integrity("envelope signature rejected".into()))?;

    let key = message_key(shared_secret, &envelope.conversation_id)?;
    let plaintext = crypto::open(&key, &envelope.ciphertext, &header)?;

    let message = AgentMessage::from_bytes(&plaintext)?;
    if message.message_id != envelope.message_id
        || message.conversation_id != envelope.conversation_id
        || message.sender_id != envelope.sender_id
        || message.recipient_id != envelope.recipient_id
    {
        return Err(Error::Protocol("envelope does not match message".into()));
    }
    message.validate()?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_shared_secret, Keypair};
    use crate::identity::generate_signing_keypair;
    use crate::messaging::message::MessageContent;

    struct Peer {
        keys: Keypair,
        signing: SigningKeypair,
    }

    impl Peer {
        fn new() -> Self {
            Self {
                keys: Keypair::generate(),
                signing: generate_signing_keypair(),
            }
        }
    }

    fn secrets(alice: &Peer, bob: &Peer) -> (SharedSecret, SharedSecret) {
        let a = derive_shared_secret(&alice.keys, bob.keys.public_key()).expect("alice secret");
        let b = derive_shared_secret(&bob.keys, alice.keys.public_key()).expect("bob secret");
        (a, b)
    }

    fn proposal() -> AgentMessage {
        AgentMessage::new(
            "alice-1",
            "bob-2",
            MessageContent::Proposal {
                summary: "meet tuesday 10:00".into(),
                details: serde_json::json!({"slot": "2026-09-01T10:00:00Z"}),
            },
        )
    }

    #[test]
    fn round_trip_preserves_the_message() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);
        let message = proposal();

        let envelope = encrypt(&message, &alice_secret, &alice.signing).expect("encrypt");
        let received =
            decrypt(&envelope, &bob_secret, &alice.signing.public_key()).expect("decrypt");

        assert_eq!(received, message);
    }

    #[test]
    fn ciphertext_varies_per_call_but_both_verify() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);
        let message = proposal();

        let first = encrypt(&message, &alice_secret, &alice.signing).expect("encrypt");
        let second = encrypt(&message, &alice_secret, &alice.signing).expect("encrypt");

        assert_ne!(first.ciphertext, second.ciphertext);
        decrypt(&first, &bob_secret, &alice.signing.public_key()).expect("first decrypts");
        decrypt(&second, &bob_secret, &alice.signing.public_key()).expect("second decrypts");
    }

    #[test]
    fn any_ciphertext_bit_flip_is_an_integrity_error() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);
        let envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        let last = envelope.ciphertext.len() - 1;
        for position in [0, envelope.ciphertext.len() / 2, last] {
            for bit in [0, 3, 7] {
                let mut tampered = envelope.clone();
                tampered.ciphertext[position] ^= 1 << bit;
                assert!(
                    matches!(
                        decrypt(&tampered, &bob_secret, &alice.signing.public_key()),
                        Err(Error::Integrity(_))
                    ),
                    "flip at byte {position} bit {bit} must be caught"
                );
            }
        }
    }

    #[test]
    fn any_signature_bit_flip_is_an_integrity_error() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);
        let envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        for position in [0, 31, 63] {
            let mut tampered = envelope.clone();
            tampered.signature[position] ^= 0x01;
            assert!(matches!(
                decrypt(&tampered, &bob_secret, &alice.signing.public_key()),
                Err(Error::Integrity(_))
            ));
        }
    }

    #[test]
    fn tampered_header_is_an_integrity_error() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);
        let envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        let mut tampered = envelope;
        tampered.sender_id = "mallory-9".into();
        assert!(matches!(
            decrypt(&tampered, &bob_secret, &alice.signing.public_key()),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn truncated_signature_is_an_integrity_error() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);
        let mut envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        envelope.signature.truncate(32);
        assert!(matches!(
            decrypt(&envelope, &bob_secret, &alice.signing.public_key()),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn wrong_signing_key_is_an_integrity_error() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);
        let envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        let impostor = generate_signing_keypair();
        assert!(matches!(
            decrypt(&envelope, &bob_secret, &impostor.public_key()),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn wrong_shared_secret_fails_decryption_not_verification() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, _) = secrets(&alice, &bob);
        let envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        let carol = Peer::new();
        let unrelated = derive_shared_secret(&carol.keys, bob.keys.public_key()).expect("secret");
        assert!(matches!(
            decrypt(&envelope, &unrelated, &alice.signing.public_key()),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn header_that_disagrees_with_plaintext_is_rejected() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, bob_secret) = secrets(&alice, &bob);

        // A malicious sender seals one message but declares another in the
        // envelope header, with a valid signature over the forged header.
        let inner = proposal();
        let forged_id = Uuid::new_v4();
        let header = binding(&forged_id, &inner.conversation_id, "alice-1", "bob-2");
        let key = message_key(&alice_secret, &inner.conversation_id).expect("key");
        let ciphertext =
            crypto::seal(&key, &inner.to_bytes().expect("bytes"), &header).expect("seal");
        let mut signed = header;
        signed.extend_from_slice(&ciphertext);
        let signature = ed25519_dalek::Signer::sign(alice.signing.signing_key(), &signed);

        let envelope = EncryptedEnvelope {
            message_id: forged_id,
            conversation_id: inner.conversation_id.clone(),
            sender_id: "alice-1".into(),
            recipient_id: "bob-2".into(),
            ciphertext,
            signature: signature.to_bytes().to_vec(),
        };

        assert!(matches!(
            decrypt(&envelope, &bob_secret, &alice.signing.public_key()),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn envelope_wire_form_is_hex_and_camel_case() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, _) = secrets(&alice, &bob);
        let envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        let json = serde_json::to_value(&envelope).expect("serialize");
        assert!(json.get("messageId").is_some());
        assert!(json.get("conversationId").is_some());
        let ciphertext = json["ciphertext"].as_str().expect("hex string");
        assert!(ciphertext.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(json["signature"].as_str().expect("hex").len(), 128);
    }

    #[test]
    fn envelope_debug_omits_ciphertext_bytes() {
        let (alice, bob) = (Peer::new(), Peer::new());
        let (alice_secret, _) = secrets(&alice, &bob);
        let envelope = encrypt(&proposal(), &alice_secret, &alice.signing).expect("encrypt");

        let debug = format!("{envelope:?}");
        assert!(debug.contains("ciphertext_len"));
        assert!(!debug.contains(&hex::encode(&envelope.ciphertext)));
    }
}
