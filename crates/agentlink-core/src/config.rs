//! Client configuration.
//!
//! Supplied once at construction and never mutated afterwards. The
//! reconnection knobs bound the automatic retry phase; everything else in
//! the crate fails fast.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of sequential reconnection attempts before giving up.
pub const DEFAULT_RECONNECTION_ATTEMPTS: u32 = 5;

/// Default base delay between reconnection attempts.
pub const DEFAULT_RECONNECTION_DELAY: Duration = Duration::from_secs(2);

/// Default deadline for the auth handshake and for message acknowledgments.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling applied to the backed-off reconnection delay.
pub const MAX_RECONNECTION_DELAY: Duration = Duration::from_secs(300);

/// Largest exponent used when backing off, so the shift cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Configuration for a [`MessagingClient`](crate::messaging::MessagingClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Broker endpoint the transport dials, e.g. `wss://broker.example.org`.
    pub url: String,
    /// Endpoint path component, e.g. `/agents`.
    pub path: String,
    /// How many sequential reconnection attempts to make after a transport
    /// drop. Zero disables automatic reconnection entirely.
    pub reconnection_attempts: u32,
    /// Base delay between reconnection attempts; grows exponentially per
    /// attempt up to [`MAX_RECONNECTION_DELAY`].
    pub reconnection_delay: Duration,
    /// Deadline for the auth handshake and per-message acknowledgments.
    pub timeout: Duration,
    /// Connect during [`start`](crate::messaging::MessagingClient::start)
    /// using the token provider, without an explicit `connect` call.
    pub auto_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            path: "/agents".to_string(),
            reconnection_attempts: DEFAULT_RECONNECTION_ATTEMPTS,
            reconnection_delay: DEFAULT_RECONNECTION_DELAY,
            timeout: DEFAULT_TIMEOUT,
            auto_connect: false,
        }
    }
}

impl ClientConfig {
    /// Config pointing at `url` with defaults for everything else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Checks the construction-time invariants.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Protocol("config: url must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Protocol("config: timeout must be non-zero".into()));
        }
        if self.reconnection_attempts > 0 && self.reconnection_delay.is_zero() {
            return Err(Error::Protocol(
                "config: reconnection_delay must be non-zero when reconnection is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Delay to sleep before reconnection attempt `attempt` (1-based).
    ///
    /// Exponential: `reconnection_delay * 2^(attempt - 1)`, capped at
    /// [`MAX_RECONNECTION_DELAY`].
    pub fn reconnect_delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        let delay = self.reconnection_delay.saturating_mul(1 << shift);
        delay.min(MAX_RECONNECTION_DELAY)
    }
}
