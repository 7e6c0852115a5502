// crates/onlineca-client/src/issuance.rs
// ============================================================================
// Module: Credential Issuance Client
// Description: CSR submission and response parsing for the Online CA.
// Purpose: Turn credentials and a server URL into a key pair plus chain.
// Dependencies: rcgen, rsa, url, x509-parser
// ============================================================================

//! ## Overview
//! [`CredentialIssuanceClient::issue`] generates a fresh key pair and CSR,
//! posts the CSR as the `certificate_request` form field, and classifies the
//! returned certificates. A non-success status is terminal; nothing retries.
//! Invariants:
//! - One key pair per call; keys are never reused across calls.
//! - Exactly one end-entity certificate or the call fails.
//! - The PEM bundle order is end-entity, private key, intermediates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::debug;
use tracing::info;
use url::Url;

use crate::chain::IssuedCertificateChain;
use crate::keys::DEFAULT_DIGEST;
use crate::keys::DEFAULT_KEY_BITS;
use crate::keys::KeyMaterialError;
use crate::keys::KeyPair;
use crate::keys::build_csr;
use crate::keys::generate_key_pair;
use crate::transport::Credentials;
use crate::transport::ErrorResponse;
use crate::transport::HttpTransport;
use crate::transport::ReqwestTransport;
use crate::transport::TlsSettings;
use crate::transport::TransportError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Form field carrying the PEM CSR.
pub const CERTIFICATE_REQUEST_FIELD: &str = "certificate_request";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Issuance failures.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Key generation or CSR signing failed.
    #[error(transparent)]
    KeyMaterial(#[from] KeyMaterialError),
    /// No HTTP response was obtained.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server answered with a non-success status.
    #[error("certificate request refused: {0}")]
    ErrorResponse(ErrorResponse),
    /// The response body could not be decoded.
    #[error("malformed issuance response: {0}")]
    MalformedResponse(String),
    /// More than one certificate in the response lacks the CA flag.
    #[error("response contains multiple end-entity certificates: {}", subjects.join("; "))]
    MultipleEndEntityCertificates {
        /// Subjects of the conflicting certificates.
        subjects: Vec<String>,
    },
    /// Every certificate in the response is a CA.
    #[error("response contains no end-entity certificate")]
    NoEndEntityCertificate,
    /// Writing the PEM bundle failed.
    #[error("credential output error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Issued Credential
// ============================================================================

/// Key pair plus the certificate chain issued over it.
#[derive(Debug)]
pub struct IssuedCredential {
    /// Private key generated for this issuance.
    key_pair: KeyPair,
    /// Certificates returned by the CA.
    chain: IssuedCertificateChain,
}

impl IssuedCredential {
    /// Returns the key pair.
    #[must_use]
    pub const fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Returns the certificate chain.
    #[must_use]
    pub const fn chain(&self) -> &IssuedCertificateChain {
        &self.chain
    }

    /// Splits the credential into its parts.
    #[must_use]
    pub fn into_parts(self) -> (KeyPair, IssuedCertificateChain) {
        (self.key_pair, self.chain)
    }

    /// Serializes end-entity certificate, private key, then intermediates.
    #[must_use]
    pub fn to_pem_bundle(&self) -> String {
        let mut bundle = String::from(self.chain.end_entity().pem());
        bundle.push_str(&self.key_pair.private_key_pem());
        if !bundle.ends_with('\n') {
            bundle.push('\n');
        }
        for intermediate in self.chain.intermediates() {
            bundle.push_str(intermediate.pem());
        }
        bundle
    }

    /// Writes the PEM bundle to `path`, owner read/write only on Unix.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::Io`] when the file cannot be written.
    pub fn write_pem_bundle(&self, path: &Path) -> Result<(), IssuanceError> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .map_err(|err| IssuanceError::Io(format!("{}: {err}", path.display())))?;
        file.write_all(self.to_pem_bundle().as_bytes())
            .map_err(|err| IssuanceError::Io(format!("{}: {err}", path.display())))?;
        info!(path = %path.display(), "wrote credential bundle");
        Ok(())
    }
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Issues short-lived credentials from an Online CA endpoint.
#[derive(Debug, Clone)]
pub struct CredentialIssuanceClient<T> {
    /// Authenticated transport.
    transport: T,
    /// RSA modulus size for generated keys.
    key_bits: usize,
    /// CSR signature digest.
    digest: String,
}

impl CredentialIssuanceClient<ReqwestTransport> {
    /// Builds a client over a `reqwest` transport with the given TLS settings.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::Transport`] when the transport cannot be built.
    pub fn with_tls(tls: &TlsSettings) -> Result<Self, IssuanceError> {
        Ok(Self::new(ReqwestTransport::new(tls)?))
    }
}

impl<T: HttpTransport> CredentialIssuanceClient<T> {
    /// Creates a client with default key strength and digest.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            key_bits: DEFAULT_KEY_BITS,
            digest: DEFAULT_DIGEST.to_string(),
        }
    }

    /// Overrides the generated key size.
    #[must_use]
    pub const fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// Overrides the CSR digest.
    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = digest.into();
        self
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Requests a new credential from `server_url`.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError`] on key generation, transport, status or
    /// response parsing failures. Nothing is retried.
    pub fn issue(
        &self,
        credentials: &Credentials,
        server_url: &Url,
    ) -> Result<IssuedCredential, IssuanceError> {
        let key_pair = generate_key_pair(self.key_bits)?;
        let csr = build_csr(&key_pair, &self.digest)?;
        let response = self.transport.post_form(
            server_url,
            credentials,
            &[(CERTIFICATE_REQUEST_FIELD, csr.pem())],
        )?;
        if let Some(error) = response.error_response() {
            info!(url = %server_url, status = error.status, "certificate request refused");
            return Err(IssuanceError::ErrorResponse(error));
        }
        let body = std::str::from_utf8(&response.body).map_err(|_| {
            IssuanceError::MalformedResponse("response body is not utf-8".to_string())
        })?;
        let chain = IssuedCertificateChain::from_pem_response(body)?;
        debug!(intermediates = chain.intermediates().len(), "classified issuance response");
        info!(subject = %chain.end_entity().subject(), "issued certificate");
        Ok(IssuedCredential {
            key_pair,
            chain,
        })
    }
}
