// crates/onlineca-client/tests/token_store.rs
// ============================================================================
// Module: Token Store Tests
// Description: File-backed OAuth token persistence.
// Purpose: Ensure tokens round-trip and stay owner-only on disk.
// Dependencies: onlineca-client, tempfile
// ============================================================================
//! ## Overview
//! Saves, overwrites and reloads tokens through [`FileTokenStore`].

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;

use onlineca_client::FileTokenStore;
use onlineca_client::OAuthToken;
use onlineca_client::TokenStore;
use onlineca_client::TokenStoreError;
use tempfile::tempdir;

/// Tests that a saved token loads back unchanged, extras included.
#[test]
fn saved_token_round_trips() {
    let dir = tempdir().unwrap();
    let store = FileTokenStore::new(dir.path().join("token.json"));
    let token = OAuthToken::from_response_body(
        br#"{"access_token":"a1","refresh_token":"r1","expires_in":3600,"scope":["cert"],"nonce":"n"}"#,
    )
    .unwrap();

    store.save(&token).unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(loaded, token);
    assert!(loaded.expires_at.is_some());
    assert_eq!(loaded.extra.get("nonce").and_then(|v| v.as_str()), Some("n"));
}

/// Tests that saving replaces the previous token and keeps owner-only mode.
#[test]
fn save_replaces_previous_token() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("token.json");
    fs::write(&path, "stale contents that are much longer than the new token file").unwrap();
    let store = FileTokenStore::new(&path);

    store.save(&OAuthToken::bearer("fresh")).unwrap();
    assert_eq!(store.load().unwrap().access_token, "fresh");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

/// Tests that a missing or corrupt file is reported distinctly.
#[test]
fn missing_and_corrupt_files_are_reported() {
    let dir = tempdir().unwrap();
    let store = FileTokenStore::new(dir.path().join("absent.json"));
    assert!(matches!(store.load(), Err(TokenStoreError::NotFound(_))));

    fs::write(store.path(), "{not json").unwrap();
    assert!(matches!(store.load(), Err(TokenStoreError::Serialization(_))));
}
