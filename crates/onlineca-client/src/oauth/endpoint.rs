// crates/onlineca-client/src/oauth/endpoint.rs
// ============================================================================
// Module: OAuth Token Endpoint
// Description: Authorization-code and refresh-token grants.
// Purpose: Exchange codes and refresh tokens at the provider's token URL.
// Dependencies: reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! [`HttpTokenEndpoint`] posts form-encoded grants to the provider with the
//! client credentials in an HTTP Basic header. Any non-success status becomes
//! [`OAuthError::ErrorResponse`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use tracing::debug;
use url::Url;

use crate::oauth::OAuthError;
use crate::token::OAuthToken;
use crate::transport::Credentials;
use crate::transport::HttpTransport;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Provider token endpoint.
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges an authorization code for a token.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError`] when the exchange fails.
    fn exchange_code(&self, code: &str, redirect_uri: &Url) -> Result<OAuthToken, OAuthError>;

    /// Obtains a fresh token from a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError`] when the grant fails.
    fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError>;
}

// ============================================================================
// SECTION: HTTP Endpoint
// ============================================================================

/// Token endpoint reached over an [`HttpTransport`].
pub struct HttpTokenEndpoint<T> {
    /// Transport used for grants.
    transport: T,
    /// Provider token URL.
    token_url: Url,
    /// Client credentials (HTTP Basic).
    client: Credentials,
}

impl<T: HttpTransport> HttpTokenEndpoint<T> {
    /// Creates an endpoint for `token_url` authenticating as the given client.
    #[must_use]
    pub fn new(transport: T, token_url: Url, client_id: &str, client_secret: &str) -> Self {
        Self {
            transport,
            token_url,
            client: Credentials::basic(client_id, client_secret),
        }
    }

    /// Posts a grant and decodes the token response.
    fn grant(&self, fields: &[(&str, &str)]) -> Result<OAuthToken, OAuthError> {
        let response = self.transport.post_form(&self.token_url, &self.client, fields)?;
        if let Some(error) = response.error_response() {
            return Err(OAuthError::ErrorResponse(error));
        }
        OAuthToken::from_response_body(&response.body)
            .map_err(|err| OAuthError::InvalidTokenResponse(err.to_string()))
    }
}

impl<T: HttpTransport> TokenEndpoint for HttpTokenEndpoint<T> {
    fn exchange_code(&self, code: &str, redirect_uri: &Url) -> Result<OAuthToken, OAuthError> {
        debug!(token_url = %self.token_url, "exchanging authorization code");
        self.grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
        ])
    }

    fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        debug!(token_url = %self.token_url, "refreshing access token");
        self.grant(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
    }
}
