//! Alpaca Stream Credentials
//!
//! Market data streams require authentication right after the connected
//! acknowledgment:
//!
//! 1. Connect to WebSocket endpoint
//! 2. Receive `[{"T":"success","msg":"connected"}]`
//! 3. Send `{"action":"auth","key":"...","secret":"..."}`
//! 4. Receive `[{"T":"success","msg":"authenticated"}]` or an error batch
//!
//! # Error Codes
//!
//! - 401: Not authenticated
//! - 402: Authentication failed (invalid credentials)
//! - 403: Already authenticated
//! - 404: Authentication timeout (>10 seconds)
//!
//! # References
//!
//! - [Stock Streaming Auth](https://docs.alpaca.markets/docs/streaming-market-data)

use thiserror::Error;

use super::messages::AuthRequest;

/// Invalid credential input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    /// API key is empty.
    #[error("API key cannot be empty")]
    EmptyKey,

    /// API secret is empty.
    #[error("API secret cannot be empty")]
    EmptySecret,
}

/// API credentials for one login.
///
/// The secret is never printed by `Debug` or `Display`.
#[derive(Clone)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// Key and secret are kept verbatim; no trimming or escaping.
    ///
    /// # Errors
    ///
    /// Returns an error if either key or secret is empty.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, CredentialsError> {
        let key = key.into();
        let secret = secret.into();

        if key.is_empty() {
            return Err(CredentialsError::EmptyKey);
        }
        if secret.is_empty() {
            return Err(CredentialsError::EmptySecret);
        }

        Ok(Self { key, secret })
    }

    /// Get the API key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build the authentication request for these credentials.
    #[must_use]
    pub fn auth_request(&self) -> AuthRequest<'_> {
        AuthRequest::new(&self.key, &self.secret)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials(key={})", self.key)
    }
}
