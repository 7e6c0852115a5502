// crates/onlineca-config/src/lib.rs
// ============================================================================
// Module: Online CA Config Library
// Description: Settings model and default locations for the Online CA client.
// Purpose: Single source of truth for OAuth settings file semantics.
// Dependencies: serde, serde_yaml, url
// ============================================================================

//! ## Overview
//! `onlineca-config` defines the OAuth 2.0 settings record consumed by the
//! authorization-code flow, resolves where that record and the other
//! client-side files live by default, and validates settings fail-closed.
//!
//! Security posture: settings files are untrusted input and may hold a
//! client secret; nothing here logs secret values.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod paths;
pub mod settings;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use paths::ClientPaths;
pub use paths::DEFAULT_CA_CERT_DIR;
pub use paths::DEFAULT_SETTINGS_FILENAME;
pub use paths::DEFAULT_TOKEN_FILENAME;
pub use paths::SETTINGS_PATH_ENV_VAR;
pub use settings::ConfigError;
pub use settings::OAuthSettings;
pub use settings::ScopeSetting;
pub use settings::is_loopback_url;
pub use settings::validate_listener_urls;
