// crates/onlineca-client/src/trust_roots.rs
// ============================================================================
// Module: Trust Root Bootstrap
// Description: Download and materialize the CA's published trust anchors.
// Purpose: Establish the local CA directory used for later peer verification.
// Dependencies: base64, reqwest, url
// ============================================================================

//! ## Overview
//! The trust-root endpoint returns newline-separated `name=base64(pem)`
//! records. [`TrustRootBootstrap::fetch`] retrieves and parses them;
//! [`TrustRootSet::materialize`] writes one file per record.
//! Invariants:
//! - A record without `=` fails the whole parse.
//! - Record names are plain file names (no separators, no `..`).
//! - Materialization overwrites same-named files but is not transactional: a
//!   failure part way leaves the directory partially populated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::transport::ErrorResponse;
use crate::transport::HttpTransport;
use crate::transport::ReqwestTransport;
use crate::transport::TlsSettings;
use crate::transport::TransportError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Trust-root retrieval and materialization failures.
#[derive(Debug, Error)]
pub enum TrustRootError {
    /// No HTTP response was obtained.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server answered with a non-success status.
    #[error("trust root request refused: {0}")]
    ErrorResponse(ErrorResponse),
    /// A record lacks the `name=content` separator or has an unusable name.
    #[error("malformed trust root record on line {line}: {reason}")]
    MalformedRecord {
        /// One-based line number.
        line: usize,
        /// Description of the defect.
        reason: String,
    },
    /// A record's content is not valid base64.
    #[error("invalid base64 for trust root {name}: {reason}")]
    InvalidEncoding {
        /// Record name.
        name: String,
        /// Decoder message.
        reason: String,
    },
    /// Writing the directory failed.
    #[error("trust root io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Trust Root Set
// ============================================================================

/// Named PEM trust anchors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustRootSet {
    /// File name to PEM bytes.
    entries: BTreeMap<String, Vec<u8>>,
}

impl TrustRootSet {
    /// Parses a `name=base64` record body.
    ///
    /// Blank lines are ignored. A repeated name keeps the last record.
    ///
    /// # Errors
    ///
    /// Returns [`TrustRootError::MalformedRecord`] or
    /// [`TrustRootError::InvalidEncoding`] on the first bad record.
    pub fn parse(body: &str) -> Result<Self, TrustRootError> {
        let mut entries = BTreeMap::new();
        for (index, raw) in body.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let Some((name, encoded)) = line.split_once('=') else {
                return Err(TrustRootError::MalformedRecord {
                    line: index + 1,
                    reason: "missing '=' separator".to_string(),
                });
            };
            let name = name.trim();
            validate_name(name).map_err(|reason| TrustRootError::MalformedRecord {
                line: index + 1,
                reason,
            })?;
            let content =
                STANDARD.decode(encoded.trim()).map_err(|err| TrustRootError::InvalidEncoding {
                    name: name.to_string(),
                    reason: err.to_string(),
                })?;
            entries.insert(name.to_string(), content);
        }
        Ok(Self {
            entries,
        })
    }

    /// Returns the PEM bytes stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Iterates entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(name, content)| (name.as_str(), content.as_slice()))
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes one file per entry into `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`TrustRootError::Io`] when the directory cannot be created or
    /// a file cannot be written. Files written before the failure remain.
    pub fn materialize(&self, directory: &Path) -> Result<(), TrustRootError> {
        fs::create_dir_all(directory)
            .map_err(|err| TrustRootError::Io(format!("{}: {err}", directory.display())))?;
        for (name, content) in &self.entries {
            let path = directory.join(name);
            fs::write(&path, content)
                .map_err(|err| TrustRootError::Io(format!("{}: {err}", path.display())))?;
            debug!(path = %path.display(), "wrote trust root");
        }
        info!(dir = %directory.display(), count = self.entries.len(), "materialized trust roots");
        Ok(())
    }
}

/// Rejects names that would escape the target directory.
fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty file name".to_string());
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(format!("unsafe file name '{name}'"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Bootstrap Client
// ============================================================================

/// Fetches trust roots from an Online CA server.
#[derive(Debug, Clone, Default)]
pub struct TrustRootBootstrap {
    /// Settings used when not bootstrapping.
    tls: TlsSettings,
}

impl TrustRootBootstrap {
    /// Creates a client that verifies peers with `tls` outside bootstrap mode.
    #[must_use]
    pub const fn new(tls: TlsSettings) -> Self {
        Self {
            tls,
        }
    }

    /// Fetches the trust-root set. `bootstrap` disables peer verification for
    /// this call only.
    ///
    /// # Errors
    ///
    /// Returns [`TrustRootError`] on transport, status or parse failures.
    pub fn fetch(&self, server_url: &Url, bootstrap: bool) -> Result<TrustRootSet, TrustRootError> {
        let transport = if bootstrap {
            warn!(url = %server_url, "bootstrap mode: fetching trust roots without peer verification");
            ReqwestTransport::new(&TlsSettings {
                timeout: self.tls.timeout,
                ..TlsSettings::bootstrap()
            })?
        } else {
            ReqwestTransport::new(&self.tls)?
        };
        fetch_with(&transport, server_url)
    }
}

/// Fetches and parses trust roots over an arbitrary transport.
///
/// # Errors
///
/// Returns [`TrustRootError`] on transport, status or parse failures.
pub fn fetch_with<T: HttpTransport + ?Sized>(
    transport: &T,
    server_url: &Url,
) -> Result<TrustRootSet, TrustRootError> {
    let response = transport.get(server_url)?;
    if let Some(error) = response.error_response() {
        return Err(TrustRootError::ErrorResponse(error));
    }
    let body = std::str::from_utf8(&response.body).map_err(|_| TrustRootError::MalformedRecord {
        line: 0,
        reason: "response body is not utf-8".to_string(),
    })?;
    let set = TrustRootSet::parse(body)?;
    debug!(count = set.len(), "parsed trust roots");
    Ok(set)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::TrustRootError;
    use super::TrustRootSet;

    /// Tests that blank lines are skipped.
    #[test]
    fn blank_lines_are_ignored() {
        let set = TrustRootSet::parse("\nca1=aGVsbG8=\n\n").unwrap();
        assert_eq!(set.get("ca1"), Some(&b"hello"[..]));
    }

    /// Tests that a line without a separator fails the parse.
    #[test]
    fn missing_separator_is_fatal() {
        let err = TrustRootSet::parse("ca1=aGVsbG8=\nbroken\n").unwrap_err();
        assert!(matches!(err, TrustRootError::MalformedRecord { line: 2, .. }));
    }

    /// Tests that names escaping the directory are rejected.
    #[test]
    fn traversal_names_are_rejected() {
        for body in ["../evil=aGVsbG8=", "..=aGVsbG8=", "a/b=aGVsbG8=", "=aGVsbG8="] {
            let err = TrustRootSet::parse(body).unwrap_err();
            assert!(matches!(err, TrustRootError::MalformedRecord { .. }), "{body}");
        }
    }

    /// Tests that bad base64 is reported with the record name.
    #[test]
    fn invalid_base64_names_the_record() {
        let err = TrustRootSet::parse("ca1=!!!").unwrap_err();
        match err {
            TrustRootError::InvalidEncoding {
                name, ..
            } => assert_eq!(name, "ca1"),
            other => panic!("unexpected error {other}"),
        }
    }
}
