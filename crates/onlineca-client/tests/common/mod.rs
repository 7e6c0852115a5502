// crates/onlineca-client/tests/common/mod.rs
// ============================================================================
// Module: Shared Test Fixtures
// Description: Ephemeral CA hierarchies and scripted transports.
// Purpose: Avoid committing certificates while covering chain classification.
// Dependencies: rcgen, onlineca-client
// ============================================================================

#![allow(dead_code, reason = "Helpers are shared across several test binaries.")]

use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use onlineca_client::Credentials;
use onlineca_client::HttpResponse;
use onlineca_client::HttpTransport;
use onlineca_client::TransportError;
use rcgen::BasicConstraints;
use rcgen::CertificateParams;
use rcgen::DistinguishedName;
use rcgen::DnType;
use rcgen::IsCa;
use rcgen::Issuer;
use rcgen::KeyPair;
use url::Url;

/// PEM text of a minted hierarchy.
pub struct Hierarchy {
    pub root: String,
    pub intermediate: String,
    pub leaf: String,
    pub second_leaf: String,
}

/// Mints root -> intermediate -> two leaves. The first leaf carries no Basic
/// Constraints extension; the second carries one with `cA = false`.
pub fn mint_hierarchy() -> Hierarchy {
    let root_key = KeyPair::generate().expect("root key");
    let mut root_params = CertificateParams::default();
    root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    root_params.distinguished_name = name("Online CA Test Root");
    let root = root_params.self_signed(&root_key).expect("root cert");
    let root_issuer = Issuer::new(root_params, root_key);

    let intermediate_key = KeyPair::generate().expect("intermediate key");
    let mut intermediate_params = CertificateParams::default();
    intermediate_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    intermediate_params.distinguished_name = name("Online CA Test Intermediate");
    let intermediate =
        intermediate_params.signed_by(&intermediate_key, &root_issuer).expect("intermediate cert");
    let intermediate_issuer = Issuer::new(intermediate_params, intermediate_key);

    let leaf = leaf_cert("alice", IsCa::NoCa, &intermediate_issuer);
    let second_leaf = leaf_cert("bob", IsCa::ExplicitNoCa, &intermediate_issuer);

    Hierarchy {
        root: root.pem(),
        intermediate: intermediate.pem(),
        leaf,
        second_leaf,
    }
}

/// Mints an end-entity certificate for `common_name`.
fn leaf_cert(common_name: &str, is_ca: IsCa, issuer: &Issuer<'_, KeyPair>) -> String {
    let key = KeyPair::generate().expect("leaf key");
    let mut params = CertificateParams::default();
    params.is_ca = is_ca;
    params.distinguished_name = name(common_name);
    params.signed_by(&key, issuer).expect("leaf cert").pem()
}

/// Builds a single-CN distinguished name.
fn name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name
}

/// Request captured by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub credentials: Credentials,
    pub fields: Vec<(String, String)>,
}

/// Transport that answers every request with a fixed response.
pub struct ScriptedTransport {
    response: HttpResponse,
    calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    /// Answers with `status` and `body`.
    pub fn new(status: u16, reason: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            response: HttpResponse {
                status,
                reason: reason.to_string(),
                body: body.into(),
            },
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns how many requests were made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the recorded requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl HttpTransport for ScriptedTransport {
    fn post_form(
        &self,
        url: &Url,
        credentials: &Credentials,
        fields: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(RecordedRequest {
            url: url.to_string(),
            credentials: credentials.clone(),
            fields: fields.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        });
        Ok(self.response.clone())
    }

    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        self.post_form(url, &Credentials::Anonymous, &[])
    }
}
