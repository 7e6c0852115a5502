// crates/onlineca-client/src/oauth/coordinator.rs
// ============================================================================
// Module: Authorization Code Coordinator
// Description: Drives one loopback authorization attempt to completion.
// Purpose: Start the listener, launch the browser, wait, stop, persist.
// Dependencies: onlineca-config, tracing, url
// ============================================================================

//! ## Overview
//! [`AuthorizationCodeCoordinator::get_access_token`] runs the attempt on the
//! calling thread. The wait is a blocking receive on the single-slot
//! completion channel, optionally bounded by a timeout, and can be woken from
//! another thread through a [`CancelHandle`]. The listener is stopped on every
//! exit path because [`LoopbackServer`] stops itself on drop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::SyncSender;
use std::time::Duration;

use onlineca_config::OAuthSettings;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::oauth::AttemptState;
use crate::oauth::CallbackOutcome;
use crate::oauth::OAuthError;
use crate::oauth::browser::BrowserLauncher;
use crate::oauth::browser::SystemBrowser;
use crate::oauth::endpoint::HttpTokenEndpoint;
use crate::oauth::endpoint::TokenEndpoint;
use crate::oauth::loopback::LoopbackServer;
use crate::oauth::loopback::LoopbackServerConfig;
use crate::token::OAuthToken;
use crate::token::TokenStore;
use crate::transport::ReqwestTransport;
use crate::transport::TlsSettings;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Shared cancellation state.
#[derive(Default)]
struct CancelState {
    /// Sticky cancellation flag.
    cancelled: AtomicBool,
    /// Completion sender of the attempt in progress.
    armed: Mutex<Option<SyncSender<CallbackOutcome>>>,
}

/// Cancels an authorization attempt from another thread.
///
/// Cancellation is sticky: once cancelled, later attempts on the same
/// coordinator fail immediately.
#[derive(Clone, Default)]
pub struct CancelHandle {
    /// State shared with the coordinator.
    inner: Arc<CancelState>,
}

impl CancelHandle {
    /// Cancels the current and any later attempt.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let sender = self.inner.armed.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.try_send(Err(OAuthError::Cancelled));
        }
    }

    /// Returns true once [`CancelHandle::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Attaches the completion sender of a starting attempt.
    fn arm(&self, sender: SyncSender<CallbackOutcome>) {
        *self.inner.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    /// Detaches the completion sender once the attempt is over.
    fn disarm(&self) {
        self.inner.armed.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Drives the OAuth 2.0 authorization-code flow through a loopback server.
pub struct AuthorizationCodeCoordinator {
    /// Loopback server settings.
    config: LoopbackServerConfig,
    /// Provider token endpoint.
    endpoint: Arc<dyn TokenEndpoint>,
    /// Browser used to open the start URL.
    browser: Box<dyn BrowserLauncher>,
    /// Optional token persistence.
    store: Option<Box<dyn TokenStore>>,
    /// Optional bound on the callback wait.
    callback_timeout: Option<Duration>,
    /// Cancellation shared with other threads.
    cancel: CancelHandle,
}

impl AuthorizationCodeCoordinator {
    /// Creates a coordinator using the system browser and no token store.
    #[must_use]
    pub fn new(config: LoopbackServerConfig, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            config,
            endpoint,
            browser: Box::new(SystemBrowser),
            store: None,
            callback_timeout: None,
            cancel: CancelHandle::default(),
        }
    }

    /// Builds a coordinator from settings, reaching the token endpoint over
    /// `reqwest` with the given TLS settings.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError`] when the settings are invalid or the transport
    /// cannot be built.
    pub fn from_settings(settings: &OAuthSettings, tls: &TlsSettings) -> Result<Self, OAuthError> {
        let config = LoopbackServerConfig::from_settings(settings)?;
        let token_url = Url::parse(&settings.token_url)
            .map_err(|err| OAuthError::Config(format!("token_url: {err}")))?;
        let endpoint = HttpTokenEndpoint::new(
            ReqwestTransport::new(tls)?,
            token_url,
            &settings.client_id,
            &settings.client_secret,
        );
        Ok(Self::new(config, Arc::new(endpoint)).with_callback_timeout(settings.callback_timeout()))
    }

    /// Replaces the browser launcher.
    #[must_use]
    pub fn with_browser(mut self, browser: Box<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// Persists obtained tokens to `store`.
    #[must_use]
    pub fn with_token_store(mut self, store: Box<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bounds the callback wait; `None` waits until callback or cancel.
    #[must_use]
    pub const fn with_callback_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Returns a handle that can cancel attempts from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs one authorization attempt and returns the obtained token.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError`] on bind failure, callback or exchange failure,
    /// timeout, cancellation, or when persisting the token fails.
    pub fn get_access_token(&self) -> Result<OAuthToken, OAuthError> {
        if self.cancel.is_cancelled() {
            return Err(OAuthError::Cancelled);
        }
        transition(AttemptState::Idle);
        let (sender, receiver) = mpsc::sync_channel::<CallbackOutcome>(1);
        let mut server =
            LoopbackServer::start(self.config.clone(), Arc::clone(&self.endpoint), sender.clone())?;
        transition(AttemptState::Listening);
        self.cancel.arm(sender);
        if self.cancel.is_cancelled() {
            self.cancel.cancel();
        }

        let start_url = self.config.start_url();
        if let Err(err) = self.browser.open(start_url) {
            warn!(error = %err, url = %start_url, "browser launch failed; open the url manually");
        }
        info!(url = %start_url, "waiting for authorization in the browser");
        transition(AttemptState::AwaitingCallback);

        let outcome = match self.callback_timeout {
            Some(timeout) => receiver.recv_timeout(timeout).unwrap_or_else(|err| match err {
                RecvTimeoutError::Timeout => Err(OAuthError::CallbackTimeout {
                    secs: timeout.as_secs(),
                }),
                RecvTimeoutError::Disconnected => Err(stopped_without_outcome()),
            }),
            None => receiver.recv().unwrap_or_else(|_| Err(stopped_without_outcome())),
        };
        self.cancel.disarm();
        transition(AttemptState::CallbackReceived);
        server.stop();
        transition(AttemptState::Stopped);

        let token = outcome?;
        if let Some(store) = &self.store {
            store.save(&token)?;
        }
        info!("obtained access token");
        Ok(token)
    }

    /// Exchanges the token's refresh token for a new token.
    ///
    /// A response without a refresh token keeps the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::MissingRefreshToken`] when `token` has none, and
    /// other [`OAuthError`] variants on grant or persistence failure.
    pub fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken, OAuthError> {
        let refresh_token =
            token.refresh_token.as_deref().ok_or(OAuthError::MissingRefreshToken)?;
        let mut refreshed = self.endpoint.refresh(refresh_token)?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = token.refresh_token.clone();
        }
        if let Some(store) = &self.store {
            store.save(&refreshed)?;
        }
        info!("refreshed access token");
        Ok(refreshed)
    }
}

/// Logs an attempt state transition.
fn transition(state: AttemptState) {
    debug!(state = state.as_str(), "authorization attempt state");
}

/// Error for a completion channel closed without an outcome.
fn stopped_without_outcome() -> OAuthError {
    OAuthError::Server("loopback server stopped without completing".to_string())
}
