// crates/onlineca-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Argument parsing and helper behavior of the CLI entry point.
// Purpose: Ensure option conflicts and path defaults match the command set.
// Dependencies: onlineca-cli main helpers, tempfile
// ============================================================================

//! ## Overview
//! Parses representative command lines and checks the helper functions
//! that resolve token, output and trust-root paths.

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

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Cursor;
use std::path::PathBuf;

use clap::Parser;
use onlineca_config::ClientPaths;
use tempfile::tempdir;
use url::Url;

use super::Cli;
use super::Commands;
use super::output_path;
use super::password_prompt;
use super::read_password_line;
use super::resolve_token_file;
use super::tls_settings;
use super::trustroots_tls;

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Tests `get-cert` parsing with defaults.
#[test]
fn get_cert_parses_with_stdout_default() {
    let cli = Cli::try_parse_from([
        "onlineca-client",
        "get-cert",
        "-s",
        "https://ca.example.org/onlineca/certificate/",
        "-l",
        "alice",
        "-P",
    ])
    .unwrap();
    assert!(!cli.debug);
    let Commands::GetCert(command) = cli.command else {
        panic!("expected get-cert");
    };
    assert_eq!(command.username.as_deref(), Some("alice"));
    assert!(command.stdin_password);
    assert_eq!(command.out, "-");
    assert!(command.token_file.is_none());
}

/// Tests that a token conflicts with username and password options.
#[test]
fn get_cert_token_conflicts_with_password_options() {
    let url = "https://ca.example.org/onlineca/certificate/";
    assert!(Cli::try_parse_from(["onlineca-client", "get-cert", "-s", url, "-t", "-", "-l", "bob"]).is_err());
    assert!(Cli::try_parse_from(["onlineca-client", "get-cert", "-s", url, "-t", "-", "-P"]).is_err());
    assert!(Cli::try_parse_from(["onlineca-client", "get-cert", "-s", url, "-t", "-"]).is_ok());
}

/// Tests that the debug flag is accepted after the subcommand.
#[test]
fn debug_flag_is_global() {
    let cli = Cli::try_parse_from([
        "onlineca-client",
        "get-trustroots",
        "-s",
        "https://ca.example.org/onlineca/trustroots/",
        "-b",
        "-d",
    ])
    .unwrap();
    assert!(cli.debug);
    let Commands::GetTrustroots(command) = cli.command else {
        panic!("expected get-trustroots");
    };
    assert!(command.bootstrap);
    assert!(command.ca_cert_dir.is_none());
}

/// Tests that a server URL must parse.
#[test]
fn invalid_server_url_is_rejected() {
    assert!(Cli::try_parse_from(["onlineca-client", "get-trustroots", "-s", "not a url"]).is_err());
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Tests token file and output path resolution.
#[test]
fn default_markers_resolve() {
    let paths = ClientPaths::with_home("/home/alice");
    assert_eq!(
        resolve_token_file(&paths, "-"),
        PathBuf::from("/home/alice/.onlinecaclient_token.json")
    );
    assert_eq!(resolve_token_file(&paths, "/tmp/tok.json"), PathBuf::from("/tmp/tok.json"));
    assert_eq!(output_path("-"), None);
    assert_eq!(output_path("creds.pem"), Some(PathBuf::from("creds.pem")));
}

/// Tests that only the line terminator is stripped from the password.
#[test]
fn password_line_keeps_inner_whitespace() {
    let mut input = Cursor::new(" pass word \r\nnext line\n");
    assert_eq!(read_password_line(&mut input).unwrap(), " pass word ");
    let mut empty = Cursor::new("");
    assert_eq!(read_password_line(&mut empty).unwrap(), "");
}

/// Tests that the interactive prompt names the user and the server.
#[test]
fn password_prompt_names_user_and_server() {
    let url = Url::parse("https://ca.example.org/onlineca/certificate/").unwrap();
    assert_eq!(
        password_prompt("alice", &url),
        "Enter password for user alice on Online CA server https://ca.example.org/onlineca/certificate/: "
    );
}

/// Tests trust-anchor selection for explicit and default directories.
#[test]
fn tls_settings_follow_directory_presence() {
    let home = tempdir().unwrap();
    let paths = ClientPaths::with_home(home.path());

    assert!(tls_settings(&paths, None).unwrap().ca_cert_dir.is_none());
    let missing = home.path().join("missing");
    assert!(tls_settings(&paths, Some(missing.as_path())).is_err());

    std::fs::create_dir_all(paths.default_ca_cert_dir()).unwrap();
    let settings = tls_settings(&paths, None).unwrap();
    assert_eq!(settings.ca_cert_dir, Some(paths.default_ca_cert_dir()));
    assert!(settings.verify_peer);
}

/// Tests that a non-bootstrap trust-root fetch verifies against an existing
/// target directory and falls back to built-in roots otherwise.
#[test]
fn trustroots_tls_uses_existing_target_directory() {
    let home = tempdir().unwrap();
    let target = home.path().join("trustroots");

    assert!(trustroots_tls(&target, false).ca_cert_dir.is_none());

    std::fs::create_dir_all(&target).unwrap();
    let settings = trustroots_tls(&target, false);
    assert_eq!(settings.ca_cert_dir.as_deref(), Some(target.as_path()));
    assert!(settings.verify_peer);

    assert!(trustroots_tls(&target, true).ca_cert_dir.is_none());
}
