// crates/onlineca-client/src/oauth/mod.rs
// ============================================================================
// Module: OAuth Authorization Code Flow
// Description: Loopback server, token endpoint and flow coordinator.
// Purpose: Obtain a bearer token for certificate issuance via the browser.
// Dependencies: axum, tokio, subtle, webbrowser
// ============================================================================

//! ## Overview
//! One authorization attempt moves through [`AttemptState`]: a loopback
//! listener is bound, the browser is sent to its start route, the provider
//! redirects back to the callback route, the code is exchanged, and the
//! listener is stopped. The callback handler reports through a single-slot
//! channel and every handler failure is delivered as an error outcome, so
//! the waiting side always wakes.
//!
//! Security posture: the callback is untrusted input. The CSRF `state` is
//! compared in constant time, and cleartext non-loopback redirects require an
//! explicit per-server opt-in.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod browser;
pub mod coordinator;
pub mod endpoint;
pub mod loopback;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::token::OAuthToken;
use crate::token::TokenStoreError;
use crate::transport::ErrorResponse;
use crate::transport::TransportError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Result delivered through the completion channel.
pub type CallbackOutcome = Result<OAuthToken, OAuthError>;

/// Lifecycle of one authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Nothing started.
    Idle,
    /// Listener bound and serving.
    Listening,
    /// Browser launched; waiting for the provider redirect.
    AwaitingCallback,
    /// Completion signal received.
    CallbackReceived,
    /// Listener shut down and joined.
    Stopped,
}

impl AttemptState {
    /// Returns a stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::AwaitingCallback => "awaiting_callback",
            Self::CallbackReceived => "callback_received",
            Self::Stopped => "stopped",
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authorization flow failures.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Settings or loopback configuration is unusable.
    #[error("oauth configuration error: {0}")]
    Config(String),
    /// Cleartext redirect to a non-loopback host without opt-in.
    #[error("insecure redirect url {0}: enable allow_insecure_redirect to permit it")]
    InsecureRedirect(String),
    /// The loopback listener could not be bound.
    #[error("loopback listener bind failed: {0}")]
    Bind(String),
    /// The loopback server failed to start or stopped unexpectedly.
    #[error("loopback server error: {0}")]
    Server(String),
    /// No HTTP response was obtained from the provider.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The provider answered with a non-success status.
    #[error("token request refused: {0}")]
    ErrorResponse(ErrorResponse),
    /// The token endpoint body is not a token record.
    #[error("invalid token response: {0}")]
    InvalidTokenResponse(String),
    /// The callback request lacks required parameters.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),
    /// The callback `state` does not match the issued value.
    #[error("callback state mismatch")]
    StateMismatch,
    /// The provider reported an authorization error.
    #[error("authorization denied: {0}")]
    Authorization(String),
    /// No callback arrived in time.
    #[error("no authorization callback within {secs} seconds")]
    CallbackTimeout {
        /// Configured timeout.
        secs: u64,
    },
    /// The attempt was cancelled.
    #[error("authorization cancelled")]
    Cancelled,
    /// A refresh was requested for a token without a refresh token.
    #[error("token has no refresh token")]
    MissingRefreshToken,
    /// Persisting the token failed.
    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),
}
