// crates/onlineca-client/src/chain.rs
// ============================================================================
// Module: Certificate Chain Classifier
// Description: Basic Constraints classification and chain assembly.
// Purpose: Split an issuance response into one end-entity cert and its CAs.
// Dependencies: x509-parser
// ============================================================================

//! ## Overview
//! The CA returns concatenated PEM certificates in no guaranteed order. Each
//! block is decoded independently and classified by the Basic Constraints CA
//! flag; position in the response carries no meaning.
//! Invariants:
//! - A certificate is a CA only when Basic Constraints is present, decodes,
//!   and has `cA = true`.
//! - An [`IssuedCertificateChain`] holds exactly one end-entity certificate.
//! - Proxy certificates receive no special handling.

// ============================================================================
// SECTION: Imports
// ============================================================================

use x509_parser::certificate::X509Certificate;
use x509_parser::parse_x509_certificate;
use x509_parser::pem::parse_x509_pem;

use crate::issuance::IssuanceError;
use crate::subject_name::DistinguishedName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// PEM armour opening a certificate block.
pub const PEM_CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Result of classifying one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// True when the certificate may act as a CA.
    pub is_ca: bool,
}

/// Classifies a decoded certificate by its Basic Constraints extension.
///
/// A missing or undecodable extension yields `is_ca = false`.
#[must_use]
pub fn classify(certificate: &X509Certificate<'_>) -> Classification {
    let is_ca = match certificate.basic_constraints() {
        Ok(Some(extension)) => extension.value.ca,
        Ok(None) | Err(_) => false,
    };
    Classification {
        is_ca,
    }
}

// ============================================================================
// SECTION: Issued Certificates
// ============================================================================

/// One certificate taken from an issuance response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// DER encoding.
    der: Vec<u8>,
    /// PEM block as received, newline terminated.
    pem: String,
    /// Subject name.
    subject: DistinguishedName,
    /// Basic Constraints CA flag.
    is_ca: bool,
}

impl IssuedCertificate {
    /// Decodes a single PEM certificate block.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::MalformedResponse`] when the block is not a
    /// decodable X.509 certificate.
    pub fn from_pem_block(block: &str) -> Result<Self, IssuanceError> {
        let (_, pem) = parse_x509_pem(block.as_bytes())
            .map_err(|err| IssuanceError::MalformedResponse(format!("invalid pem block: {err}")))?;
        if pem.label != "CERTIFICATE" {
            return Err(IssuanceError::MalformedResponse(format!(
                "unexpected pem label {}",
                pem.label
            )));
        }
        let (_, certificate) = parse_x509_certificate(&pem.contents).map_err(|err| {
            IssuanceError::MalformedResponse(format!("invalid certificate: {err}"))
        })?;
        let subject = DistinguishedName::from_x509(certificate.subject());
        let Classification {
            is_ca,
        } = classify(&certificate);
        let mut text = block.trim().to_string();
        text.push('\n');
        Ok(Self {
            der: pem.contents,
            pem: text,
            subject,
            is_ca,
        })
    }

    /// Returns the DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM text.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Returns the subject name.
    #[must_use]
    pub const fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    /// Returns true when the certificate is a CA.
    #[must_use]
    pub const fn is_ca(&self) -> bool {
        self.is_ca
    }
}

/// One end-entity certificate plus its intermediates, in response order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificateChain {
    /// Certificate issued to the caller.
    end_entity: IssuedCertificate,
    /// CA certificates returned alongside it.
    intermediates: Vec<IssuedCertificate>,
}

impl IssuedCertificateChain {
    /// Decodes and classifies a response body of concatenated PEM blocks.
    ///
    /// # Errors
    ///
    /// Returns [`IssuanceError::MalformedResponse`] when a block is invalid or
    /// none is present, [`IssuanceError::MultipleEndEntityCertificates`] when
    /// more than one certificate is not a CA, and
    /// [`IssuanceError::NoEndEntityCertificate`] when every certificate is a CA.
    pub fn from_pem_response(body: &str) -> Result<Self, IssuanceError> {
        let blocks = split_pem_certificates(body);
        if blocks.is_empty() {
            return Err(IssuanceError::MalformedResponse(
                "response contains no certificates".to_string(),
            ));
        }
        let certificates =
            blocks.into_iter().map(IssuedCertificate::from_pem_block).collect::<Result<Vec<_>, _>>()?;
        Self::from_certificates(certificates)
    }

    /// Partitions classified certificates into a chain.
    ///
    /// # Errors
    ///
    /// See [`IssuedCertificateChain::from_pem_response`].
    pub fn from_certificates(certificates: Vec<IssuedCertificate>) -> Result<Self, IssuanceError> {
        let (mut end_entities, intermediates): (Vec<_>, Vec<_>) =
            certificates.into_iter().partition(|certificate| !certificate.is_ca);
        if end_entities.len() > 1 {
            let subjects = end_entities.iter().map(|cert| cert.subject.to_string()).collect();
            return Err(IssuanceError::MultipleEndEntityCertificates {
                subjects,
            });
        }
        let end_entity = end_entities.pop().ok_or(IssuanceError::NoEndEntityCertificate)?;
        Ok(Self {
            end_entity,
            intermediates,
        })
    }

    /// Returns the end-entity certificate.
    #[must_use]
    pub const fn end_entity(&self) -> &IssuedCertificate {
        &self.end_entity
    }

    /// Returns the intermediate CA certificates.
    #[must_use]
    pub fn intermediates(&self) -> &[IssuedCertificate] {
        &self.intermediates
    }
}

/// Splits text on the certificate BEGIN armour, dropping anything before the
/// first block.
#[must_use]
pub fn split_pem_certificates(body: &str) -> Vec<&str> {
    let starts: Vec<usize> = body.match_indices(PEM_CERTIFICATE_BEGIN).map(|(index, _)| index).collect();
    starts
        .iter()
        .enumerate()
        .map(|(position, start)| {
            let end = starts.get(position + 1).copied().unwrap_or(body.len());
            &body[*start .. end]
        })
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::split_pem_certificates;

    /// Tests that leading text is dropped and each block is kept whole.
    #[test]
    fn split_keeps_blocks_whole() {
        let body = "junk\n-----BEGIN CERTIFICATE-----\nAAA\n-----END CERTIFICATE-----\n\
                    -----BEGIN CERTIFICATE-----\nBBB\n-----END CERTIFICATE-----\n";
        let blocks = split_pem_certificates(body);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("AAA") && !blocks[0].contains("BBB"));
        assert!(blocks[1].starts_with("-----BEGIN CERTIFICATE-----"));
    }

    /// Tests that a body without armour yields nothing.
    #[test]
    fn split_without_armour_is_empty() {
        assert!(split_pem_certificates("not a certificate").is_empty());
    }
}
