// crates/onlineca-client/src/oauth/browser.rs
// ============================================================================
// Module: Browser Launcher
// Description: Opens the user's browser at the loopback start URL.
// Purpose: Keep browser launch behind a trait so attempts can run headless.
// Dependencies: url, webbrowser
// ============================================================================

//! ## Overview
//! [`SystemBrowser`] hands the start URL to the platform default browser.
//! A launch failure is not fatal: the coordinator logs the URL so the user
//! can open it by hand.

use url::Url;

/// Opens a URL for the user.
pub trait BrowserLauncher: Send + Sync {
    /// Opens `url`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; callers treat it as non-fatal.
    fn open(&self, url: &Url) -> Result<(), String>;
}

/// The platform default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> Result<(), String> {
        webbrowser::open(url.as_str()).map_err(|err| err.to_string())
    }
}
