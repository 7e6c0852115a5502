// crates/onlineca-config/src/paths.rs
// ============================================================================
// Module: Client File Locations
// Description: Default on-disk locations for settings, tokens and trust roots.
// Purpose: Resolve client paths from explicit input, environment, or home dir.
// Dependencies: std
// ============================================================================

//! ## Overview
//! The client keeps three pieces of local state: the OAuth settings file, the
//! persisted access token and the CA trust-root directory. [`ClientPaths`]
//! resolves each from an explicit override first, then the environment, then
//! a fixed location under the user's home directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::path::Path;
use std::path::PathBuf;

use crate::settings::ConfigError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Settings file name placed in the home directory.
pub const DEFAULT_SETTINGS_FILENAME: &str = ".onlinecaclient_idp.yaml";
/// Environment variable used to override the settings file path.
pub const SETTINGS_PATH_ENV_VAR: &str = "ONLINECA_CLNT_SETTINGS_FILEPATH";
/// Persisted OAuth token file name placed in the home directory.
pub const DEFAULT_TOKEN_FILENAME: &str = ".onlinecaclient_token.json";
/// Trust-root directory relative to the home directory.
pub const DEFAULT_CA_CERT_DIR: &str = ".onlineca/certificates";
/// Maximum total path length accepted from the environment.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Client Paths
// ============================================================================

/// Default client-side file locations rooted at a home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPaths {
    /// Home directory all defaults are resolved against.
    home: PathBuf,
}

impl ClientPaths {
    /// Builds client paths rooted at an explicit home directory.
    #[must_use]
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
        }
    }

    /// Builds client paths from the `HOME` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `HOME` is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var_os("HOME") {
            Some(home) if !home.is_empty() => Ok(Self::with_home(home)),
            _ => Err(ConfigError::Invalid("HOME is not set".to_string())),
        }
    }

    /// Returns the home directory.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Returns the default settings file path.
    #[must_use]
    pub fn default_settings_file(&self) -> PathBuf {
        self.home.join(DEFAULT_SETTINGS_FILENAME)
    }

    /// Returns the default persisted-token file path.
    #[must_use]
    pub fn default_token_file(&self) -> PathBuf {
        self.home.join(DEFAULT_TOKEN_FILENAME)
    }

    /// Returns the default CA trust-root directory.
    #[must_use]
    pub fn default_ca_cert_dir(&self) -> PathBuf {
        self.home.join(DEFAULT_CA_CERT_DIR)
    }

    /// Resolves the settings file: explicit path, then environment, then default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the environment override is too long.
    pub fn resolve_settings_file(&self, explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(env_path) = env::var(SETTINGS_PATH_ENV_VAR)
            && !env_path.is_empty()
        {
            if env_path.len() > MAX_TOTAL_PATH_LENGTH {
                return Err(ConfigError::Invalid("settings path exceeds max length".to_string()));
            }
            return Ok(PathBuf::from(env_path));
        }
        Ok(self.default_settings_file())
    }
}
