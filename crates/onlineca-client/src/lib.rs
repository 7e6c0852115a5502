// crates/onlineca-client/src/lib.rs
// ============================================================================
// Module: Online CA Client Library
// Description: Credential issuance, trust bootstrap and OAuth authorization.
// Purpose: Obtain short-lived X.509 credentials from an Online CA service.
// Dependencies: axum, rcgen, reqwest, rsa, x509-parser
// ============================================================================

//! ## Overview
//! `onlineca-client` talks to an Online CA over HTTPS:
//! - [`trust_roots`] downloads the CA's trust anchors into a local directory.
//! - [`issuance`] generates a key pair and CSR, submits it with Basic or
//!   Bearer credentials, and returns the classified certificate chain.
//! - [`oauth`] obtains the bearer token through the authorization-code flow
//!   with a short-lived loopback listener.
//!
//! Every operation is blocking and surfaces failures to the caller without
//! retrying. The library never terminates the process.
//!
//! Security posture: server responses and browser callbacks are untrusted;
//! secrets are never logged.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod chain;
pub mod issuance;
pub mod keys;
pub mod oauth;
pub mod subject_name;
pub mod token;
pub mod transport;
pub mod trust_roots;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use chain::Classification;
pub use chain::IssuedCertificate;
pub use chain::IssuedCertificateChain;
pub use chain::classify;
pub use issuance::CredentialIssuanceClient;
pub use issuance::IssuanceError;
pub use issuance::IssuedCredential;
pub use keys::CertificateSigningRequest;
pub use keys::KeyMaterialError;
pub use keys::KeyPair;
pub use keys::build_csr;
pub use keys::generate_key_pair;
pub use oauth::AttemptState;
pub use oauth::OAuthError;
pub use oauth::browser::BrowserLauncher;
pub use oauth::browser::SystemBrowser;
pub use oauth::coordinator::AuthorizationCodeCoordinator;
pub use oauth::coordinator::CancelHandle;
pub use oauth::endpoint::HttpTokenEndpoint;
pub use oauth::endpoint::TokenEndpoint;
pub use oauth::loopback::LoopbackServer;
pub use oauth::loopback::LoopbackServerConfig;
pub use subject_name::DistinguishedName;
pub use subject_name::Separator;
pub use subject_name::SubjectNameError;
pub use token::FileTokenStore;
pub use token::OAuthToken;
pub use token::TokenStore;
pub use token::TokenStoreError;
pub use transport::Credentials;
pub use transport::ErrorResponse;
pub use transport::HttpResponse;
pub use transport::HttpTransport;
pub use transport::ReqwestTransport;
pub use transport::TlsSettings;
pub use transport::TransportError;
pub use trust_roots::TrustRootBootstrap;
pub use trust_roots::TrustRootError;
pub use trust_roots::TrustRootSet;
