// crates/onlineca-client/src/token.rs
// ============================================================================
// Module: OAuth Token Model
// Description: Token record returned by the provider and its durable store.
// Purpose: Carry access and refresh tokens between runs of the client.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! [`OAuthToken`] mirrors the provider's token endpoint JSON. Unknown fields
//! are preserved so a saved token round-trips unchanged. [`FileTokenStore`]
//! persists one token per file, readable only by the owner.
//! Invariants:
//! - `expires_at` is filled from `expires_in` on receipt when absent.
//! - Saving replaces the previous file rather than rewriting it in place.
//! - Debug output never shows token values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use onlineca_config::ScopeSetting;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum token file size in bytes.
const MAX_TOKEN_FILE_SIZE: u64 = 64 * 1024;

// ============================================================================
// SECTION: Token
// ============================================================================

/// OAuth 2.0 token endpoint response.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Access token presented as a bearer credential.
    pub access_token: String,
    /// Token type, normally `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Refresh token, when the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds at the time of issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Absolute expiry as Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Granted scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeSetting>,
    /// Provider-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Serde default for `token_type`.
fn default_token_type() -> String {
    "Bearer".to_string()
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl OAuthToken {
    /// Creates a bearer token with no expiry information.
    #[must_use]
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            expires_in: None,
            expires_at: None,
            scope: None,
            extra: Map::new(),
        }
    }

    /// Parses a token endpoint response body and stamps its expiry.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the body is not a token record.
    pub fn from_response_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        let token: Self = serde_json::from_slice(body)?;
        Ok(token.stamped(OffsetDateTime::now_utc()))
    }

    /// Fills `expires_at` from `expires_in` relative to `now` when absent.
    #[must_use]
    pub fn stamped(mut self, now: OffsetDateTime) -> Self {
        if self.expires_at.is_none()
            && let Some(lifetime) = self.expires_in.and_then(|secs| i64::try_from(secs).ok())
        {
            self.expires_at = Some(now.unix_timestamp().saturating_add(lifetime));
        }
        self
    }

    /// Returns true when the expiry is known and not after `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now.unix_timestamp())
    }

    /// Returns true when the expiry is known and has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

// ============================================================================
// SECTION: Token Store
// ============================================================================

/// Token persistence failures.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// No token has been saved.
    #[error("token not found: {0}")]
    NotFound(String),
    /// Reading or writing failed.
    #[error("token store io error: {0}")]
    Io(String),
    /// The stored token could not be encoded or decoded.
    #[error("token store serialization error: {0}")]
    Serialization(String),
}

/// Durable single-token store.
pub trait TokenStore: Send + Sync {
    /// Replaces the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenStoreError`] when the token cannot be written.
    fn save(&self, token: &OAuthToken) -> Result<(), TokenStoreError>;

    /// Loads the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenStoreError`] when no token is stored or it is unreadable.
    fn load(&self) -> Result<OAuthToken, TokenStoreError>;
}

/// JSON file token store with owner-only permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTokenStore {
    /// Token file location.
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// Returns the token file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, token: &OAuthToken) -> Result<(), TokenStoreError> {
        let json = serde_json::to_vec_pretty(token)
            .map_err(|err| TokenStoreError::Serialization(err.to_string()))?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(self.io_error(&err)),
        }
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).map_err(|err| self.io_error(&err))?;
        file.write_all(&json).map_err(|err| self.io_error(&err))?;
        debug!(path = %self.path.display(), "saved oauth token");
        Ok(())
    }

    fn load(&self) -> Result<OAuthToken, TokenStoreError> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(TokenStoreError::NotFound(self.path.display().to_string()));
            }
            Err(err) => return Err(self.io_error(&err)),
        };
        if metadata.len() > MAX_TOKEN_FILE_SIZE {
            return Err(TokenStoreError::Io(format!(
                "{}: token file exceeds size limit",
                self.path.display()
            )));
        }
        let bytes = fs::read(&self.path).map_err(|err| self.io_error(&err))?;
        serde_json::from_slice(&bytes).map_err(|err| TokenStoreError::Serialization(err.to_string()))
    }
}

impl FileTokenStore {
    /// Wraps an I/O error with the store path.
    fn io_error(&self, err: &std::io::Error) -> TokenStoreError {
        TokenStoreError::Io(format!("{}: {err}", self.path.display()))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use time::OffsetDateTime;

    use super::OAuthToken;

    /// Tests that expiry is derived from the lifetime and extras survive.
    #[test]
    fn response_body_is_stamped_and_extras_kept() {
        let body = br#"{"access_token":"abc","token_type":"bearer","expires_in":60,"id_token":"x"}"#;
        let token: OAuthToken = serde_json::from_slice(body).unwrap();
        let now = OffsetDateTime::from_unix_timestamp(1_000).unwrap();
        let token = token.stamped(now);
        assert_eq!(token.expires_at, Some(1_060));
        assert_eq!(token.extra.get("id_token").and_then(|v| v.as_str()), Some("x"));
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(OffsetDateTime::from_unix_timestamp(1_060).unwrap()));
    }

    /// Tests that a token without expiry never reports expired.
    #[test]
    fn token_without_expiry_is_not_expired() {
        assert!(!OAuthToken::bearer("abc").is_expired());
    }

    /// Tests that debug output hides token values.
    #[test]
    fn debug_output_hides_secrets() {
        let mut token = OAuthToken::bearer("secret-access");
        token.refresh_token = Some("secret-refresh".to_string());
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }
}
