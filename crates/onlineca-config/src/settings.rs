// crates/onlineca-config/src/settings.rs
// ============================================================================
// Module: OAuth Settings
// Description: Settings record for the OAuth 2.0 authorization-code flow.
// Purpose: Provide strict, fail-closed settings parsing with hard limits.
// Dependencies: serde, serde_yaml, url
// ============================================================================

//! ## Overview
//! Settings are loaded from a YAML file (JSON is accepted as a YAML subset)
//! and validated before use. The loopback server binds the host and port of
//! `start_url`, so `start_url` and `redirect_url` must share an origin.
//! Invariants:
//! - Validation never echoes `client_secret`.
//! - A cleartext `http` redirect is accepted only for loopback hosts unless
//!   `allow_insecure_redirect` is set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Host;
use url::Url;

use crate::paths::MAX_TOTAL_PATH_LENGTH;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum settings file size in bytes.
pub(crate) const MAX_SETTINGS_FILE_SIZE: usize = 64 * 1024;
/// Upper bound for the callback wait timeout, in seconds.
pub(crate) const MAX_CALLBACK_TIMEOUT_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// SECTION: Settings Types
// ============================================================================

/// OAuth scope as written in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScopeSetting {
    /// Space-separated scope string.
    Single(String),
    /// Explicit list of scope values.
    List(Vec<String>),
}

impl ScopeSetting {
    /// Returns the individual scope values.
    #[must_use]
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::Single(value) => value.split_whitespace().map(str::to_string).collect(),
            Self::List(values) => values
                .iter()
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Returns the scope in its wire form (space separated).
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.values().join(" ")
    }
}

/// Settings for the OAuth 2.0 authorization-code flow.
///
/// # Invariants
/// - After [`OAuthSettings::validate`] every URL field parses.
/// - `start_url` and `redirect_url` share scheme, host and port.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthSettings {
    /// Client identifier registered with the provider.
    pub client_id: String,
    /// Client secret registered with the provider.
    pub client_secret: String,
    /// Requested scope.
    pub scope: ScopeSetting,
    /// Provider authorization endpoint.
    pub authorization_base_url: String,
    /// Provider token endpoint.
    pub token_url: String,
    /// Callback URL registered with the provider (served by the loopback server).
    pub redirect_url: String,
    /// Local URL opened in the browser to start the flow.
    pub start_url: String,
    /// Permit a cleartext `http` redirect URL on a non-loopback host.
    #[serde(default)]
    pub allow_insecure_redirect: bool,
    /// Optional bound on how long to wait for the browser callback.
    #[serde(default)]
    pub callback_timeout_secs: Option<u64>,
}

impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("authorization_base_url", &self.authorization_base_url)
            .field("token_url", &self.token_url)
            .field("redirect_url", &self.redirect_url)
            .field("start_url", &self.start_url)
            .field("allow_insecure_redirect", &self.allow_insecure_redirect)
            .field("callback_timeout_secs", &self.callback_timeout_secs)
            .finish()
    }
}

impl OAuthSettings {
    /// Loads and validates settings from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when reading, parsing or validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("settings path exceeds max length".to_string()));
        }
        let bytes = fs::read(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if bytes.len() > MAX_SETTINGS_FILE_SIZE {
            return Err(ConfigError::Invalid("settings file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("settings file must be utf-8".to_string()))?;
        let settings = Self::from_yaml_str(content)?;
        debug!(path = %path.display(), client_id = %settings.client_id, "loaded oauth settings");
        Ok(settings)
    }

    /// Parses and validates settings from YAML (or JSON) text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self =
            serde_yaml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when settings are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("client_id", &self.client_id)?;
        require_non_empty("client_secret", &self.client_secret)?;
        if self.scope.values().is_empty() {
            return Err(ConfigError::Invalid("scope must not be empty".to_string()));
        }
        parse_http_url("authorization_base_url", &self.authorization_base_url)?;
        parse_http_url("token_url", &self.token_url)?;
        let start = self.start_url()?;
        let redirect = self.redirect_url()?;

        validate_listener_urls(&start, &redirect, self.allow_insecure_redirect)?;
        if let Some(secs) = self.callback_timeout_secs
            && (secs == 0 || secs > MAX_CALLBACK_TIMEOUT_SECS)
        {
            return Err(ConfigError::Invalid(format!(
                "callback_timeout_secs must be between 1 and {MAX_CALLBACK_TIMEOUT_SECS}"
            )));
        }
        Ok(())
    }

    /// Returns the parsed start URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the URL does not parse.
    pub fn start_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("start_url", &self.start_url)
    }

    /// Returns the parsed redirect URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the URL does not parse.
    pub fn redirect_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("redirect_url", &self.redirect_url)
    }

    /// Returns the callback wait timeout, if configured.
    #[must_use]
    pub fn callback_timeout(&self) -> Option<Duration> {
        self.callback_timeout_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Settings loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading settings.
    #[error("settings io error: {0}")]
    Io(String),
    /// YAML parsing error.
    #[error("settings parse error: {0}")]
    Parse(String),
    /// Invalid settings data.
    #[error("invalid settings: {0}")]
    Invalid(String),
    /// Cleartext redirect to a non-loopback host without the opt-in.
    #[error("invalid settings: http redirect_url {0} requires a loopback host or allow_insecure_redirect")]
    InsecureRedirect(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true when the URL host is `localhost` or a loopback IP.
#[must_use]
pub fn is_loopback_url(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Checks that `start_url` and `redirect_url` can be served by one loopback
/// listener.
///
/// Both URLs must share scheme, host and port, use different literal paths
/// (no `{`, `}`, `*`, and no segment starting with `:`), and a cleartext
/// redirect must target a loopback host unless `allow_insecure_redirect` is
/// set.
///
/// # Errors
///
/// Returns [`ConfigError::InsecureRedirect`] for a refused cleartext redirect
/// and [`ConfigError::Invalid`] for every other violation.
pub fn validate_listener_urls(
    start: &Url,
    redirect: &Url,
    allow_insecure_redirect: bool,
) -> Result<(), ConfigError> {
    if start.scheme() != redirect.scheme()
        || start.host_str() != redirect.host_str()
        || start.port_or_known_default() != redirect.port_or_known_default()
    {
        return Err(ConfigError::Invalid(
            "start_url and redirect_url must share scheme, host and port".to_string(),
        ));
    }
    if start.path() == redirect.path() {
        return Err(ConfigError::Invalid(
            "start_url and redirect_url must use different paths".to_string(),
        ));
    }
    for (field, url) in [("start_url", start), ("redirect_url", redirect)] {
        if !is_literal_route(url.path()) {
            return Err(ConfigError::Invalid(format!("{field} path must be a literal path")));
        }
    }
    if redirect.scheme() == "http" && !allow_insecure_redirect && !is_loopback_url(redirect) {
        return Err(ConfigError::InsecureRedirect(redirect.to_string()));
    }
    Ok(())
}

/// Returns true when `path` carries no route capture or wildcard syntax.
fn is_literal_route(path: &str) -> bool {
    !path.contains(['{', '}', '*']) && !path.split('/').any(|segment| segment.starts_with(':'))
}

/// Rejects empty or whitespace-only string fields.
fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Parses an `http`/`https` URL with a host.
fn parse_http_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(value).map_err(|err| ConfigError::Invalid(format!("{field} is invalid: {err}")))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ConfigError::Invalid(format!("{field} has unsupported scheme {scheme}")));
        }
    }
    if url.host().is_none() {
        return Err(ConfigError::Invalid(format!("{field} must include a host")));
    }
    Ok(url)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use url::Url;

    use super::ConfigError;
    use super::ScopeSetting;
    use super::is_literal_route;
    use super::is_loopback_url;
    use super::validate_listener_urls;

    fn url(text: &str) -> Url {
        Url::parse(text).unwrap()
    }

    /// Tests that a scope string splits on any whitespace.
    #[test]
    fn scope_string_splits_on_whitespace() {
        let scope = ScopeSetting::Single("openid  profile\tcert".to_string());
        assert_eq!(scope.values(), vec!["openid", "profile", "cert"]);
        assert_eq!(scope.to_wire(), "openid profile cert");
    }

    /// Tests that blank list entries are dropped.
    #[test]
    fn scope_list_drops_blank_entries() {
        let scope = ScopeSetting::List(vec!["a".to_string(), " ".to_string(), "b ".to_string()]);
        assert_eq!(scope.values(), vec!["a", "b"]);
    }

    /// Tests loopback detection for names and addresses.
    #[test]
    fn loopback_detection_covers_names_and_addresses() {
        assert!(is_loopback_url(&Url::parse("http://localhost:5000/cb").unwrap()));
        assert!(is_loopback_url(&Url::parse("http://127.0.0.1:5000/cb").unwrap()));
        assert!(is_loopback_url(&Url::parse("http://[::1]:5000/cb").unwrap()));
        assert!(!is_loopback_url(&Url::parse("http://example.org/cb").unwrap()));
    }

    /// Tests that capture and wildcard route syntax is refused.
    #[test]
    fn route_syntax_is_not_literal() {
        assert!(is_literal_route("/"));
        assert!(is_literal_route("/oauth/callback"));
        assert!(is_literal_route("/cb:1"));
        assert!(!is_literal_route("/:cb"));
        assert!(!is_literal_route("/oauth/:code/cb"));
        assert!(!is_literal_route("/{cb}"));
        assert!(!is_literal_route("/cb/*rest"));
    }

    /// Tests that a colon-prefixed segment fails listener validation.
    #[test]
    fn colon_segment_fails_listener_validation() {
        let result = validate_listener_urls(
            &url("http://localhost:5000/start"),
            &url("http://localhost:5000/:cb"),
            false,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(message)) if message.contains("redirect_url")));
    }

    /// Tests that a refused cleartext redirect has its own variant.
    #[test]
    fn remote_cleartext_redirect_is_distinguished() {
        let start = url("http://client.example.org:5000/");
        let redirect = url("http://client.example.org:5000/cb");
        assert!(matches!(
            validate_listener_urls(&start, &redirect, false),
            Err(ConfigError::InsecureRedirect(_))
        ));
        assert!(validate_listener_urls(&start, &redirect, true).is_ok());
    }
}
