//! The identity/token service collaborator contract.
//!
//! The subsystem never mints credentials. It asks this trait for the bearer
//! token and user identity that go into the auth handshake; issuance,
//! refresh, and caching belong to the host.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::RedactedToken;

/// A bearer token and its expiry (epoch milliseconds).
#[derive(Clone, Serialize, Deserialize)]
pub struct Token {
    /// Opaque bearer token.
    pub token: String,
    /// Expiry as epoch milliseconds.
    pub expires_at: i64,
}

impl Token {
    /// Whether the token has already expired.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() >= self.expires_at
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token", &RedactedToken(&self.token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The user a local agent acts for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    /// Stable user identifier.
    pub user_id: String,
    /// Optional display name.
    pub display_name: Option<String>,
}

/// Supplier of handshake credentials.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token for the local user.
    async fn get_token(&self) -> Result<Token>;

    /// Identity of the local user.
    async fn get_current_user(&self) -> Result<UserInfo>;
}

/// Fixed-credential provider for tests and single-user deployments.
pub struct StaticTokenProvider {
    token: String,
    user_id: String,
}

impl StaticTokenProvider {
    /// Provider that always hands out `token` for `user_id`.
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<Token> {
        Ok(Token {
            token: self.token.clone(),
            expires_at: Utc::now().timestamp_millis() + 3_600_000,
        })
    }

    async fn get_current_user(&self) -> Result<UserInfo> {
        Ok(UserInfo {
            user_id: self.user_id.clone(),
            display_name: None,
        })
    }
}
