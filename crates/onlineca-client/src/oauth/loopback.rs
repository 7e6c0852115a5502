// crates/onlineca-client/src/oauth/loopback.rs
// ============================================================================
// Module: OAuth Loopback Server
// Description: Two-route local HTTP listener for the authorization redirect.
// Purpose: Capture the authorization code and signal the coordinator once.
// Dependencies: axum, rand, subtle, tokio, url
// ============================================================================

//! ## Overview
//! [`LoopbackServer::start`] binds the listener synchronously, so a port in
//! use fails before any browser is opened, then serves on a background
//! thread with a current-thread runtime. The start route redirects to the
//! provider with a fresh CSRF `state`; the callback route validates it,
//! exchanges the code off the async executor, answers with a static page and
//! writes the single completion slot.
//! Invariants:
//! - At most one outcome is sent per server instance.
//! - Dropping the server stops and joins the background thread.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::mpsc;
use std::sync::mpsc::SyncSender;
use std::thread;
use std::time::Duration;

use axum::Router;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use onlineca_config::ConfigError;
use onlineca_config::OAuthSettings;
use onlineca_config::validate_listener_urls;
use rand::Rng;
use rand::distributions::Alphanumeric;
use subtle::ConstantTimeEq;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;
use url::form_urlencoded;

use crate::oauth::CallbackOutcome;
use crate::oauth::OAuthError;
use crate::oauth::endpoint::TokenEndpoint;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of the generated CSRF state token.
const STATE_LENGTH: usize = 30;
/// Bound on draining in-flight requests after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Page returned after a successful exchange.
const COMPLETION_PAGE: &str = "<!DOCTYPE html><html><head><title>Online CA Client</title></head>\
<body><p>Successfully obtained access token for Online CA Client. You can close this browser \
tab now.</p></body></html>";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Validated settings for one loopback server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackServerConfig {
    /// URL opened in the browser; its host and port are bound.
    start_url: Url,
    /// Callback URL registered with the provider.
    redirect_url: Url,
    /// Provider authorization endpoint.
    authorization_base_url: Url,
    /// Client identifier.
    client_id: String,
    /// Space-separated scope.
    scope: String,
}

impl LoopbackServerConfig {
    /// Validates and builds a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Config`] when the URLs cannot share one listener
    /// or use route syntax in their paths, and
    /// [`OAuthError::InsecureRedirect`] for a cleartext non-loopback redirect
    /// without `allow_insecure_redirect`.
    pub fn new(
        start_url: Url,
        redirect_url: Url,
        authorization_base_url: Url,
        client_id: impl Into<String>,
        scope: impl Into<String>,
        allow_insecure_redirect: bool,
    ) -> Result<Self, OAuthError> {
        validate_listener_urls(&start_url, &redirect_url, allow_insecure_redirect)
            .map_err(config_error)?;
        if redirect_url.scheme() != "http" {
            return Err(OAuthError::Config(
                "the loopback server only serves plain http".to_string(),
            ));
        }
        Ok(Self {
            start_url,
            redirect_url,
            authorization_base_url,
            client_id: client_id.into(),
            scope: scope.into(),
        })
    }

    /// Builds a configuration from validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Config`] when the settings are invalid.
    pub fn from_settings(settings: &OAuthSettings) -> Result<Self, OAuthError> {
        settings.validate().map_err(config_error)?;
        let authorization_base_url = Url::parse(&settings.authorization_base_url)
            .map_err(|err| OAuthError::Config(format!("authorization_base_url: {err}")))?;
        Self::new(
            settings.start_url().map_err(|err| OAuthError::Config(err.to_string()))?,
            settings.redirect_url().map_err(|err| OAuthError::Config(err.to_string()))?,
            authorization_base_url,
            settings.client_id.clone(),
            settings.scope.to_wire(),
            settings.allow_insecure_redirect,
        )
    }

    /// Returns the start URL.
    #[must_use]
    pub const fn start_url(&self) -> &Url {
        &self.start_url
    }

    /// Returns the redirect URL.
    #[must_use]
    pub const fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    /// Builds the provider authorization URL for a CSRF `state`.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorization_base_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", &self.scope)
            .append_pair("state", state);
        url
    }

    /// Resolves the socket addresses to bind.
    fn bind_addrs(&self) -> Result<Vec<SocketAddr>, OAuthError> {
        let addrs = self
            .start_url
            .socket_addrs(|| None)
            .map_err(|err| OAuthError::Bind(format!("{}: {err}", self.start_url)))?;
        if addrs.is_empty() {
            return Err(OAuthError::Bind(format!("{} resolves to no address", self.start_url)));
        }
        Ok(addrs)
    }
}

/// Maps a settings validation failure onto the flow's error type.
fn config_error(err: ConfigError) -> OAuthError {
    match err {
        ConfigError::InsecureRedirect(url) => OAuthError::InsecureRedirect(url),
        other => OAuthError::Config(other.to_string()),
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Running loopback listener for one authorization attempt.
pub struct LoopbackServer {
    /// Bound address.
    local_addr: SocketAddr,
    /// Shutdown trigger for the serve loop.
    shutdown: Option<oneshot::Sender<()>>,
    /// Background thread running the runtime.
    join: Option<thread::JoinHandle<()>>,
}

impl LoopbackServer {
    /// Binds the listener and starts serving on a background thread.
    ///
    /// Returns once the listener is accepting connections. The callback
    /// handler sends exactly one outcome to `completion`.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Bind`] when the address is unavailable and
    /// [`OAuthError::Server`] when the runtime cannot start.
    pub fn start(
        config: LoopbackServerConfig,
        endpoint: Arc<dyn TokenEndpoint>,
        completion: SyncSender<CallbackOutcome>,
    ) -> Result<Self, OAuthError> {
        let listener = StdTcpListener::bind(config.bind_addrs()?.as_slice())
            .map_err(|err| OAuthError::Bind(format!("{}: {err}", config.start_url)))?;
        listener.set_nonblocking(true).map_err(|err| OAuthError::Bind(err.to_string()))?;
        let local_addr = listener.local_addr().map_err(|err| OAuthError::Bind(err.to_string()))?;

        let start_path = config.start_url.path().to_string();
        let callback_path = config.redirect_url.path().to_string();
        let session = Arc::new(Session {
            config,
            endpoint,
            pending_state: Mutex::new(None),
            completion: Mutex::new(Some(completion)),
        });
        let app = Router::new()
            .route(&start_path, get(handle_start))
            .route(&callback_path, get(handle_callback))
            .with_state(session);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let join = thread::spawn(move || serve(listener, app, shutdown_rx, &ready_tx));
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = join.join();
                return Err(OAuthError::Server(message));
            }
            Err(_) => {
                let _ = join.join();
                return Err(OAuthError::Server("loopback server exited during startup".to_string()));
            }
        }
        info!(addr = %local_addr, start = %start_path, callback = %callback_path, "loopback server listening");
        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Requests graceful shutdown and joins the background thread.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("loopback server thread panicked");
            }
            debug!(addr = %self.local_addr, "loopback server stopped");
        }
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs the serve loop until shutdown, then drains for a bounded time.
fn serve(
    listener: StdTcpListener,
    app: Router,
    shutdown: oneshot::Receiver<()>,
    ready: &mpsc::Sender<Result<(), String>>,
) {
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(format!("loopback runtime: {err}")));
            return;
        }
    };
    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(err) => {
                let _ = ready.send(Err(format!("loopback listener: {err}")));
                return;
            }
        };
        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = drain_rx.await;
        });
        let server = tokio::spawn(server.into_future());
        let _ = ready.send(Ok(()));
        let _ = shutdown.await;
        let _ = drain_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => warn!(error = %err, "loopback server failed"),
            Ok(Err(err)) => warn!(error = %err, "loopback server task failed"),
            Err(_) => warn!("loopback server drain timed out"),
        }
    });
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// State shared by the two routes.
struct Session {
    /// Attempt configuration.
    config: LoopbackServerConfig,
    /// Provider token endpoint.
    endpoint: Arc<dyn TokenEndpoint>,
    /// CSRF state issued by the start route.
    pending_state: Mutex<Option<String>>,
    /// Single-use completion slot.
    completion: Mutex<Option<SyncSender<CallbackOutcome>>>,
}

impl Session {
    /// Sends the outcome if no outcome has been sent yet.
    fn complete(&self, outcome: CallbackOutcome) {
        let sender = self.completion.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            Some(sender) => {
                if sender.try_send(outcome).is_err() {
                    debug!("completion slot already filled or closed");
                }
            }
            None => debug!("ignoring repeated callback"),
        }
    }
}

/// Start route: redirect the browser to the provider.
async fn handle_start(State(session): State<Arc<Session>>) -> Response {
    let state = generate_state();
    let location = session.config.authorization_url(&state);
    *session.pending_state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    debug!("redirecting browser to authorization endpoint");
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// Callback route: validate, exchange, respond and complete.
async fn handle_callback(
    State(session): State<Arc<Session>>,
    RawQuery(query): RawQuery,
) -> Response {
    let outcome = process_callback(&session, query.as_deref().unwrap_or_default()).await;
    let response = match &outcome {
        Ok(_) => (StatusCode::OK, Html(COMPLETION_PAGE.to_string())).into_response(),
        Err(err) => {
            warn!(error = %err, "authorization callback failed");
            (StatusCode::BAD_REQUEST, Html(failure_page(&err.to_string()))).into_response()
        }
    };
    session.complete(outcome);
    response
}

/// Validates the callback parameters and exchanges the code.
async fn process_callback(session: &Session, query: &str) -> CallbackOutcome {
    let params = CallbackParams::parse(query);
    if let Some(error) = params.error {
        let detail = params.error_description.map_or(error.clone(), |text| format!("{error}: {text}"));
        return Err(OAuthError::Authorization(detail));
    }
    let expected = session.pending_state.lock().unwrap_or_else(PoisonError::into_inner).take();
    let (Some(expected), Some(received)) = (expected, params.state) else {
        return Err(OAuthError::StateMismatch);
    };
    if !bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        return Err(OAuthError::StateMismatch);
    }
    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| OAuthError::InvalidCallback("missing authorization code".to_string()))?;
    let endpoint = Arc::clone(&session.endpoint);
    let redirect_url = session.config.redirect_url.clone();
    tokio::task::spawn_blocking(move || endpoint.exchange_code(&code, &redirect_url))
        .await
        .map_err(|err| OAuthError::Server(format!("token exchange task: {err}")))?
}

/// Query parameters recognised on the callback route.
#[derive(Default)]
struct CallbackParams {
    /// Authorization code.
    code: Option<String>,
    /// Echoed CSRF state.
    state: Option<String>,
    /// Provider error code.
    error: Option<String>,
    /// Provider error text.
    error_description: Option<String>,
}

impl CallbackParams {
    /// Parses a raw query string; later duplicates are ignored.
    fn parse(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// Generates a random alphanumeric CSRF state.
fn generate_state() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(STATE_LENGTH).map(char::from).collect()
}

/// Renders the failure page.
fn failure_page(message: &str) -> String {
    let escaped = message.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
    format!(
        "<!DOCTYPE html><html><head><title>Online CA Client</title></head>\
         <body><p>Authorization failed: {escaped}</p></body></html>"
    )
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

    use super::CallbackParams;
    use super::LoopbackServerConfig;
    use super::generate_state;
    use crate::oauth::OAuthError;

    /// Builds a config against a fixed provider.
    fn build_config(
        redirect: &str,
        start: &str,
        allow_insecure: bool,
    ) -> Result<LoopbackServerConfig, OAuthError> {
        LoopbackServerConfig::new(
            Url::parse(start).unwrap(),
            Url::parse(redirect).unwrap(),
            Url::parse("https://idp.example.org/authorize").unwrap(),
            "client",
            "cert openid",
            allow_insecure,
        )
    }

    /// Tests that the authorization URL carries the expected parameters.
    #[test]
    fn authorization_url_embeds_client_scope_and_state() {
        let config = build_config("http://localhost:5000/cb", "http://localhost:5000/", false).unwrap();
        let url = config.authorization_url("abc123");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("client_id".to_string(), "client".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "cert openid".to_string())));
        assert!(pairs.contains(&("state".to_string(), "abc123".to_string())));
        assert!(pairs.contains(&("redirect_uri".to_string(), "http://localhost:5000/cb".to_string())));
    }

    /// Tests the per-instance cleartext redirect opt-in.
    #[test]
    fn remote_cleartext_redirect_requires_opt_in() {
        let result = build_config("http://host.example.org:5000/cb", "http://host.example.org:5000/", false);
        assert!(matches!(result, Err(OAuthError::InsecureRedirect(_))));
        assert!(build_config("http://host.example.org:5000/cb", "http://host.example.org:5000/", true).is_ok());
    }

    /// Tests that start and callback must share one listener.
    #[test]
    fn split_origins_are_rejected() {
        let result = build_config("http://localhost:5001/cb", "http://localhost:5000/", false);
        assert!(matches!(result, Err(OAuthError::Config(_))));
    }

    /// Tests that route syntax in a path is refused before any router is built.
    #[test]
    fn route_syntax_in_paths_is_rejected() {
        for redirect in ["http://localhost:5000/:cb", "http://localhost:5000/*cb"] {
            let result = build_config(redirect, "http://localhost:5000/start", false);
            assert!(matches!(result, Err(OAuthError::Config(_))), "{redirect} accepted");
        }
    }

    /// Tests that generated states are alphanumeric and distinct.
    #[test]
    fn generated_state_is_alphanumeric() {
        let first = generate_state();
        assert_eq!(first.len(), 30);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, generate_state());
    }

    /// Tests that callback parameters are decoded and the first value wins.
    #[test]
    fn callback_params_decode_first_value() {
        let params = CallbackParams::parse("code=a%2Fb&state=s1&state=s2&extra=1");
        assert_eq!(params.code.as_deref(), Some("a/b"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert!(params.error.is_none());
    }
}
