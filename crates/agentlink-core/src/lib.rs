//! # AgentLink Core Library
//!
//! A secure messaging subsystem for autonomous agents: authenticated
//! connections to a relay broker, end-to-end encrypted and signed message
//! exchange, conversation history, delivery tracking, and typed events.
//!
//! ## Security Model
//!
//! The broker relays frames but is never trusted with content:
//!
//! - Every agent message is encrypted and signed before it leaves the
//!   process; only the [`messaging::EncryptedEnvelope`] crosses the wire.
//! - Per-conversation keys come from an X25519 agreement between the two
//!   agents, so the broker holds no decryption material.
//! - Signatures are verified before any decryption is attempted, and
//!   verification failures are surfaced as security events.
//! - Peer identities are pinned on first contact; later key changes are
//!   accepted only when announced under the previously pinned keys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Application                │
//! ├─────────────────────────────────────────┤
//! │  messaging  │  storage  │  token        │
//! ├─────────────────────────────────────────┤
//! │        protocol (frames, wire)          │
//! ├─────────────────────────────────────────┤
//! │    crypto    │       identity           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The [`messaging::MessagingClient`] is the front door. Its collaborators
//! (transport [`transport::Connector`], [`token::TokenProvider`],
//! [`storage::KeyValueStorage`]) are injected, so deployments and tests can
//! swap any of them without touching the core.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod messaging;
pub mod protocol;
pub mod storage;
pub mod token;
pub mod transport;

pub use config::ClientConfig;
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum plaintext message size in bytes (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65536;
