// crates/onlineca-client/src/keys.rs
// ============================================================================
// Module: Key Material
// Description: RSA key pair generation and PKCS#10 request construction.
// Purpose: Produce the private key and CSR submitted for each issuance.
// Dependencies: rand, rcgen, rsa
// ============================================================================

//! ## Overview
//! A fresh RSA key pair is generated for every issuance call. The CSR carries
//! an empty subject: the CA derives identity from the authenticated principal,
//! not from request fields.
//! Invariants:
//! - The private key never leaves the process except through caller-requested
//!   PEM serialization.
//! - A CSR is self-signed by the key pair it embeds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rcgen::CertificateParams;
use rcgen::DistinguishedName;
use rcgen::PublicKeyData;
use rcgen::SignatureAlgorithm;
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::pkcs8::LineEnding;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default RSA modulus size in bits.
pub const DEFAULT_KEY_BITS: usize = 2048;
/// Default CSR signature digest.
pub const DEFAULT_DIGEST: &str = "sha256";
/// Modulus sizes accepted by the signing provider.
const SUPPORTED_KEY_BITS: [usize; 3] = [2048, 3072, 4096];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Key generation and signing failures.
#[derive(Debug, Error)]
pub enum KeyMaterialError {
    /// Requested key strength is unsupported or generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    /// Digest is unavailable or the request could not be signed.
    #[error("signing failed: {0}")]
    Signing(String),
}

// ============================================================================
// SECTION: Key Pair
// ============================================================================

/// RSA key pair owned by the caller that requested issuance.
pub struct KeyPair {
    /// Modulus size in bits.
    bits: usize,
    /// Signing key bound to the default digest.
    inner: rcgen::KeyPair,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("bits", &self.bits).finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Returns the modulus size in bits.
    #[must_use]
    pub const fn bits(&self) -> usize {
        self.bits
    }

    /// Returns the DER-encoded `SubjectPublicKeyInfo`.
    #[must_use]
    pub fn public_key_der(&self) -> Vec<u8> {
        self.inner.subject_public_key_info()
    }

    /// Returns the PKCS#8 PEM encoding of the private key.
    #[must_use]
    pub fn private_key_pem(&self) -> String {
        self.inner.serialize_pem()
    }

    /// Rebinds the private key to the signature algorithm for `digest`.
    fn signing_key(&self, digest: &str) -> Result<rcgen::KeyPair, KeyMaterialError> {
        let algorithm = signature_algorithm(digest)?;
        rcgen::KeyPair::from_pkcs8_pem_and_sign_algo(&self.inner.serialize_pem(), algorithm)
            .map_err(|err| KeyMaterialError::Signing(err.to_string()))
    }
}

/// Generates an RSA key pair of the requested strength.
///
/// # Errors
///
/// Returns [`KeyMaterialError::KeyGeneration`] when `bits` is unsupported or
/// the provider fails.
pub fn generate_key_pair(bits: usize) -> Result<KeyPair, KeyMaterialError> {
    if !SUPPORTED_KEY_BITS.contains(&bits) {
        return Err(KeyMaterialError::KeyGeneration(format!(
            "unsupported rsa key size {bits}; expected 2048, 3072 or 4096"
        )));
    }
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|err| KeyMaterialError::KeyGeneration(err.to_string()))?;
    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| KeyMaterialError::KeyGeneration(err.to_string()))?;
    let inner = rcgen::KeyPair::from_pkcs8_pem_and_sign_algo(pem.as_str(), &rcgen::PKCS_RSA_SHA256)
        .map_err(|err| KeyMaterialError::KeyGeneration(err.to_string()))?;
    debug!(bits, "generated rsa key pair");
    Ok(KeyPair {
        bits,
        inner,
    })
}

// ============================================================================
// SECTION: Certificate Signing Request
// ============================================================================

/// PEM-encoded PKCS#10 request over one [`KeyPair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSigningRequest {
    /// PEM text sent to the CA.
    pem: String,
    /// DER encoding of the same request.
    der: Vec<u8>,
}

impl CertificateSigningRequest {
    /// Returns the PEM text.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Returns the DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Consumes the request, returning its PEM text.
    #[must_use]
    pub fn into_pem(self) -> String {
        self.pem
    }
}

/// Builds a CSR over `key_pair`, self-signed with the named digest.
///
/// # Errors
///
/// Returns [`KeyMaterialError::Signing`] when the digest is unavailable or
/// signing fails.
pub fn build_csr(
    key_pair: &KeyPair,
    digest: &str,
) -> Result<CertificateSigningRequest, KeyMaterialError> {
    let signing_key = key_pair.signing_key(digest)?;
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    let request = params
        .serialize_request(&signing_key)
        .map_err(|err| KeyMaterialError::Signing(err.to_string()))?;
    let pem = request.pem().map_err(|err| KeyMaterialError::Signing(err.to_string()))?;
    debug!(digest, "built certificate signing request");
    Ok(CertificateSigningRequest {
        pem,
        der: request.der().to_vec(),
    })
}

/// Maps a digest name to the matching RSA PKCS#1 v1.5 signature algorithm.
fn signature_algorithm(digest: &str) -> Result<&'static SignatureAlgorithm, KeyMaterialError> {
    match digest.to_ascii_lowercase().as_str() {
        "sha256" => Ok(&rcgen::PKCS_RSA_SHA256),
        "sha384" => Ok(&rcgen::PKCS_RSA_SHA384),
        "sha512" => Ok(&rcgen::PKCS_RSA_SHA512),
        other => Err(KeyMaterialError::Signing(format!("unsupported digest {other}"))),
    }
}
