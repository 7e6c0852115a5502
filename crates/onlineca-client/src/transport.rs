// crates/onlineca-client/src/transport.rs
// ============================================================================
// Module: Authenticated Transport
// Description: Blocking HTTP transport carrying Basic or Bearer credentials.
// Purpose: Give the issuance, trust-root and token clients one narrow seam.
// Dependencies: reqwest, url, x509-parser
// ============================================================================

//! ## Overview
//! [`HttpTransport`] is the only capability the protocol clients depend on:
//! post a form with credentials, or issue a plain GET. [`ReqwestTransport`] is
//! the production implementation over a blocking `reqwest` client.
//! Invariants:
//! - Redirects are never followed.
//! - Response bodies are capped at [`MAX_RESPONSE_BYTES`].
//! - With a CA directory configured, only its certificates are trusted.
//!
//! Security posture: [`TlsSettings::bootstrap`] disables peer verification and
//! is only meant for the first trust-root download.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;
use tracing::warn;
use url::Url;
use x509_parser::pem::Pem;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted response body size in bytes.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Transport-level failures (no HTTP status was obtained).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("http client error: {0}")]
    Client(String),
    /// The configured CA directory could not be loaded.
    #[error("trust store error: {0}")]
    TrustStore(String),
    /// Request failed before a response was received, or the body was unreadable.
    #[error("http error: {0}")]
    Http(String),
    /// Response body exceeded the size limit.
    #[error("response exceeds {max_bytes} bytes")]
    TooLarge {
        /// Configured limit.
        max_bytes: usize,
    },
}

/// Non-success HTTP status returned by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase for the status.
    pub reason: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "http status {}", self.status)
        } else {
            write!(f, "http status {} {}", self.status, self.reason)
        }
    }
}

// ============================================================================
// SECTION: Credentials and Responses
// ============================================================================

/// Authentication attached to a request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP Basic authentication.
    Basic {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// OAuth 2.0 bearer token.
    Bearer {
        /// Access token value.
        token: String,
    },
    /// No authentication.
    Anonymous,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic {
                username, ..
            } => f.debug_struct("Basic").field("username", username).finish_non_exhaustive(),
            Self::Bearer {
                ..
            } => f.debug_struct("Bearer").finish_non_exhaustive(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

impl Credentials {
    /// Builds Basic credentials.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Builds Bearer credentials.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Returns a short label for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Basic {
                ..
            } => "basic",
            Self::Bearer {
                ..
            } => "bearer",
            Self::Anonymous => "anonymous",
        }
    }

    /// Applies the credentials to a request.
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Basic {
                username,
                password,
            } => request.basic_auth(username, Some(password)),
            Self::Bearer {
                token,
            } => request.bearer_auth(token),
            Self::Anonymous => request,
        }
    }
}

/// Fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase (may be empty).
    pub reason: String,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns the status as an [`ErrorResponse`] when it is not a success.
    #[must_use]
    pub fn error_response(&self) -> Option<ErrorResponse> {
        if self.is_success() {
            return None;
        }
        Some(ErrorResponse {
            status: self.status,
            reason: self.reason.clone(),
        })
    }
}

// ============================================================================
// SECTION: Transport Trait
// ============================================================================

/// Blocking HTTP capability used by the protocol clients.
pub trait HttpTransport: Send + Sync {
    /// Posts a form-encoded body with the given credentials.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response could be obtained.
    fn post_form(
        &self,
        url: &Url,
        credentials: &Credentials,
        fields: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError>;

    /// Issues an unauthenticated GET.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response could be obtained.
    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError>;
}

// ============================================================================
// SECTION: TLS Settings
// ============================================================================

/// Peer verification settings for [`ReqwestTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// Directory of PEM trust anchors; `None` uses the built-in roots.
    pub ca_cert_dir: Option<PathBuf>,
    /// Verify the server certificate chain and host name.
    pub verify_peer: bool,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_cert_dir: None,
            verify_peer: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TlsSettings {
    /// Trusts only the certificates found in `dir`.
    #[must_use]
    pub fn with_ca_cert_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            ca_cert_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Disables peer verification for trust bootstrapping.
    #[must_use]
    pub fn bootstrap() -> Self {
        Self {
            verify_peer: false,
            ..Self::default()
        }
    }
}

// ============================================================================
// SECTION: Reqwest Transport
// ============================================================================

/// [`HttpTransport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    /// Configured client.
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport from TLS settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the CA directory cannot be read or the
    /// client cannot be built.
    pub fn new(tls: &TlsSettings) -> Result<Self, TransportError> {
        let mut builder = Client::builder().redirect(Policy::none()).timeout(tls.timeout);
        if tls.verify_peer {
            if let Some(dir) = &tls.ca_cert_dir {
                builder = builder.tls_built_in_root_certs(false);
                for der in load_ca_dir(dir)? {
                    let certificate = reqwest::Certificate::from_der(&der)
                        .map_err(|err| TransportError::TrustStore(err.to_string()))?;
                    builder = builder.add_root_certificate(certificate);
                }
            }
        } else {
            warn!("tls peer verification disabled for this transport");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|err| TransportError::Client(err.to_string()))?;
        Ok(Self {
            client,
        })
    }

    /// Wraps a preconfigured client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self {
            client,
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_form(
        &self,
        url: &Url,
        credentials: &Credentials,
        fields: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        debug!(url = %url, auth = credentials.kind(), "posting form");
        let request = credentials.apply(self.client.post(url.as_str())).form(fields);
        let response = request.send().map_err(|err| TransportError::Http(err.to_string()))?;
        read_response(response)
    }

    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        debug!(url = %url, "sending get");
        let response =
            self.client.get(url.as_str()).send().map_err(|err| TransportError::Http(err.to_string()))?;
        read_response(response)
    }
}

/// Reads status and a size-capped body.
fn read_response(response: reqwest::blocking::Response) -> Result<HttpResponse, TransportError> {
    let status = response.status();
    if let Some(length) = response.content_length()
        && length > MAX_RESPONSE_BYTES as u64
    {
        return Err(TransportError::TooLarge {
            max_bytes: MAX_RESPONSE_BYTES,
        });
    }
    let mut body = Vec::new();
    response
        .take(MAX_RESPONSE_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|err| TransportError::Http(err.to_string()))?;
    if body.len() > MAX_RESPONSE_BYTES {
        return Err(TransportError::TooLarge {
            max_bytes: MAX_RESPONSE_BYTES,
        });
    }
    Ok(HttpResponse {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        body,
    })
}

/// Loads every PEM certificate from files in `dir`.
fn load_ca_dir(dir: &Path) -> Result<Vec<Vec<u8>>, TransportError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| TransportError::TrustStore(format!("{}: {err}", dir.display())))?;
    let mut certificates = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| TransportError::TrustStore(err.to_string()))?.path();
        if !path.is_file() {
            continue;
        }
        let bytes = fs::read(&path)
            .map_err(|err| TransportError::TrustStore(format!("{}: {err}", path.display())))?;
        for pem in Pem::iter_from_buffer(&bytes) {
            match pem {
                Ok(pem) if pem.label == "CERTIFICATE" => certificates.push(pem.contents),
                Ok(_) => {}
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "skipping non-pem trust file");
                    break;
                }
            }
        }
    }
    if certificates.is_empty() {
        return Err(TransportError::TrustStore(format!(
            "no certificates found in {}",
            dir.display()
        )));
    }
    debug!(dir = %dir.display(), count = certificates.len(), "loaded trust anchors");
    Ok(certificates)
}
