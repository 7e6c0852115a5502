// crates/onlineca-cli/src/main.rs
// ============================================================================
// Module: Online CA Client CLI Entry Point
// Description: Command dispatcher for trust-root, token and certificate tasks.
// Purpose: Expose the client library as the `onlineca-client` command.
// Dependencies: clap, onlineca-client, onlineca-config, rpassword, thiserror, tracing
// ============================================================================

//! ## Overview
//! The `onlineca-client` command bootstraps trust roots, obtains and
//! refreshes OAuth access tokens through the browser loopback flow, and
//! requests certificates with a password or a saved token. Errors are
//! written to stderr and mapped to a failure exit code; diagnostics go
//! through `tracing` to stderr so stdout stays reserved for PEM output.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::BufRead;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use onlineca_client::AuthorizationCodeCoordinator;
use onlineca_client::CredentialIssuanceClient;
use onlineca_client::Credentials;
use onlineca_client::FileTokenStore;
use onlineca_client::TlsSettings;
use onlineca_client::TokenStore;
use onlineca_client::TrustRootBootstrap;
use onlineca_config::ClientPaths;
use onlineca_config::OAuthSettings;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Argument value selecting stdout for output or the default token file.
const DEFAULT_MARKER: &str = "-";
/// Environment variable supplying the default username.
const USERNAME_ENV: &str = "LOGNAME";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "onlineca-client",
    about = "Online CA (Certificate Authority) Client",
    disable_help_subcommand = true
)]
struct Cli {
    /// Print debug information.
    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue, global = true)]
    debug: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Retrieve CA trust roots to bootstrap trust with the Online CA service.
    GetTrustroots(GetTrustrootsCommand),
    /// Obtain an OAuth access token through an interactive browser session.
    GetToken(TokenCommand),
    /// Refresh a saved OAuth access token.
    RefreshToken(TokenCommand),
    /// Obtain a new certificate from an Online CA.
    GetCert(GetCertCommand),
}

/// Arguments for `get-trustroots`.
#[derive(Args, Debug)]
struct GetTrustrootsCommand {
    /// Server URL for the get trust roots request.
    #[arg(short = 's', long = "server-url", value_name = "URL")]
    server_url: Url,
    /// Directory to write trust roots to; created when missing.
    #[arg(short = 'c', long = "ca-cert-dir", value_name = "DIR")]
    ca_cert_dir: Option<PathBuf>,
    /// Skip server certificate verification for this request.
    #[arg(short = 'b', long = "bootstrap", action = ArgAction::SetTrue)]
    bootstrap: bool,
}

/// Arguments shared by `get-token` and `refresh-token`.
#[derive(Args, Debug)]
struct TokenCommand {
    /// Token file location.
    #[arg(short = 't', long = "token", value_name = "TOKEN_FILE")]
    token_file: Option<PathBuf>,
    /// YAML settings for the OAuth 2.0 service.
    #[arg(short = 'f', long = "settings", value_name = "SETTINGS_FILE")]
    settings_file: Option<PathBuf>,
}

/// Arguments for `get-cert`.
#[derive(Args, Debug)]
struct GetCertCommand {
    /// Server URL for the get certificate request.
    #[arg(short = 's', long = "server-url", value_name = "URL")]
    server_url: Url,
    /// Username; defaults to `LOGNAME`.
    #[arg(short = 'l', long = "username", value_name = "USER")]
    username: Option<String>,
    /// Read the password from one line of stdin without prompting.
    #[arg(short = 'P', long = "stdin-password", action = ArgAction::SetTrue)]
    stdin_password: bool,
    /// Authenticate with the OAuth token in this file; `-` selects the default.
    #[arg(
        short = 't',
        long = "token",
        value_name = "TOKEN_FILE",
        conflicts_with_all = ["username", "stdin_password"]
    )]
    token_file: Option<String>,
    /// Output path for the PEM bundle; `-` writes to stdout.
    #[arg(short = 'o', long = "out", value_name = "OUT", default_value = DEFAULT_MARKER)]
    out: String,
    /// Directory of trusted CA certificates.
    #[arg(short = 'c', long = "ca-cert-dir", value_name = "DIR")]
    ca_cert_dir: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a printable message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);
    match run(cli) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the selected command.
fn run(cli: Cli) -> CliResult<ExitCode> {
    let paths = ClientPaths::from_env().map_err(|err| CliError::new(err.to_string()))?;
    match cli.command {
        Commands::GetTrustroots(command) => command_get_trustroots(&paths, &command),
        Commands::GetToken(command) => command_get_token(&paths, &command),
        Commands::RefreshToken(command) => command_refresh_token(&paths, &command),
        Commands::GetCert(command) => command_get_cert(&paths, &command),
    }
}

/// Installs the stderr subscriber; `RUST_LOG` overrides the default level.
fn init_logging(debug: bool) {
    let level = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `get-trustroots`.
fn command_get_trustroots(paths: &ClientPaths, command: &GetTrustrootsCommand) -> CliResult<ExitCode> {
    let directory = command.ca_cert_dir.clone().unwrap_or_else(|| paths.default_ca_cert_dir());
    let tls = trustroots_tls(&directory, command.bootstrap);
    let roots = TrustRootBootstrap::new(tls)
        .fetch(&command.server_url, command.bootstrap)
        .map_err(|err| CliError::new(format!("get trust roots failed: {err}")))?;
    roots
        .materialize(&directory)
        .map_err(|err| CliError::new(format!("writing trust roots failed: {err}")))?;
    info!(count = roots.len(), directory = %directory.display(), "trust roots written");
    Ok(ExitCode::SUCCESS)
}

/// Executes `get-token`.
fn command_get_token(paths: &ClientPaths, command: &TokenCommand) -> CliResult<ExitCode> {
    let token_file = command.token_file.clone().unwrap_or_else(|| paths.default_token_file());
    let coordinator = load_coordinator(paths, command.settings_file.as_deref(), &token_file)?;
    coordinator
        .get_access_token()
        .map_err(|err| CliError::new(format!("get access token failed: {err}")))?;
    write_stdout_line(&format!("Access token written to '{}'", token_file.display()))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `refresh-token`.
fn command_refresh_token(paths: &ClientPaths, command: &TokenCommand) -> CliResult<ExitCode> {
    let token_file = command.token_file.clone().unwrap_or_else(|| paths.default_token_file());
    let token = FileTokenStore::new(&token_file)
        .load()
        .map_err(|err| CliError::new(format!("reading token failed: {err}")))?;
    let coordinator = load_coordinator(paths, command.settings_file.as_deref(), &token_file)?;
    coordinator
        .refresh(&token)
        .map_err(|err| CliError::new(format!("refresh access token failed: {err}")))?;
    write_stdout_line(&format!("Access token refreshed in '{}'", token_file.display()))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `get-cert`.
fn command_get_cert(paths: &ClientPaths, command: &GetCertCommand) -> CliResult<ExitCode> {
    let credentials = match command.token_file.as_deref() {
        Some(token_arg) => {
            let token_file = resolve_token_file(paths, token_arg);
            let token = FileTokenStore::new(&token_file)
                .load()
                .map_err(|err| CliError::new(format!("reading token failed: {err}")))?;
            if token.is_expired() {
                return Err(CliError::new(format!(
                    "access token in '{}' has expired; run refresh-token or get-token",
                    token_file.display()
                )));
            }
            Credentials::bearer(token.access_token)
        }
        None => {
            let username = command
                .username
                .clone()
                .unwrap_or_else(|| std::env::var(USERNAME_ENV).unwrap_or_default());
            let password = if command.stdin_password {
                let stdin = std::io::stdin();
                read_password_line(&mut stdin.lock())?
            } else {
                rpassword::prompt_password(password_prompt(&username, &command.server_url))
                    .map_err(|err| CliError::new(format!("reading password failed: {err}")))?
            };
            Credentials::basic(username, password)
        }
    };

    let tls = tls_settings(paths, command.ca_cert_dir.as_deref())?;
    let client = CredentialIssuanceClient::with_tls(&tls)
        .map_err(|err| CliError::new(format!("get certificate failed: {err}")))?;
    debug!(auth = credentials.kind(), url = %command.server_url, "requesting certificate");
    let credential = client
        .issue(&credentials, &command.server_url)
        .map_err(|err| CliError::new(format!("get certificate failed: {err}")))?;

    match output_path(&command.out) {
        Some(path) => credential
            .write_pem_bundle(&path)
            .map_err(|err| CliError::new(format!("writing credentials failed: {err}")))?,
        None => write_stdout_raw(&credential.to_pem_bundle())?,
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a coordinator from the resolved settings file, saving to `token_file`.
fn load_coordinator(
    paths: &ClientPaths,
    settings_file: Option<&Path>,
    token_file: &Path,
) -> CliResult<AuthorizationCodeCoordinator> {
    let settings_path = paths
        .resolve_settings_file(settings_file)
        .map_err(|err| CliError::new(err.to_string()))?;
    let settings = OAuthSettings::load(&settings_path).map_err(|err| {
        CliError::new(format!("loading settings '{}' failed: {err}", settings_path.display()))
    })?;
    let coordinator = AuthorizationCodeCoordinator::from_settings(&settings, &TlsSettings::default())
        .map_err(|err| CliError::new(format!("invalid OAuth settings: {err}")))?;
    Ok(coordinator.with_token_store(Box::new(FileTokenStore::new(token_file))))
}

/// Maps the `get-cert -t` argument to a token file.
fn resolve_token_file(paths: &ClientPaths, token_arg: &str) -> PathBuf {
    if token_arg == DEFAULT_MARKER {
        paths.default_token_file()
    } else {
        PathBuf::from(token_arg)
    }
}

/// Maps the `-o` argument to a file path, or `None` for stdout.
fn output_path(out: &str) -> Option<PathBuf> {
    (out != DEFAULT_MARKER).then(|| PathBuf::from(out))
}

/// Chooses trust anchors: an explicit directory must exist; the default
/// directory is used only when present.
fn tls_settings(paths: &ClientPaths, explicit: Option<&Path>) -> CliResult<TlsSettings> {
    if let Some(dir) = explicit {
        if !dir.is_dir() {
            return Err(CliError::new(format!(
                "CA certificate directory '{}' does not exist",
                dir.display()
            )));
        }
        return Ok(TlsSettings::with_ca_cert_dir(dir));
    }
    let default_dir = paths.default_ca_cert_dir();
    if default_dir.is_dir() {
        Ok(TlsSettings::with_ca_cert_dir(default_dir))
    } else {
        debug!(directory = %default_dir.display(), "no trust-root directory, using built-in roots");
        Ok(TlsSettings::default())
    }
}

/// Chooses trust anchors for `get-trustroots`: the target directory when it
/// already holds roots, otherwise the built-in roots. Bootstrap skips
/// verification, so no directory is loaded.
fn trustroots_tls(directory: &Path, bootstrap: bool) -> TlsSettings {
    if !bootstrap && directory.is_dir() {
        return TlsSettings::with_ca_cert_dir(directory);
    }
    debug!(directory = %directory.display(), bootstrap, "verifying trust roots with built-in roots");
    TlsSettings::default()
}

/// Formats the interactive password prompt.
fn password_prompt(username: &str, server_url: &Url) -> String {
    format!("Enter password for user {username} on Online CA server {server_url}: ")
}

/// Reads one line and strips the trailing line terminator.
fn read_password_line(reader: &mut impl BufRead) -> CliResult<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|err| CliError::new(format!("reading password failed: {err}")))?;
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes text to stdout as-is.
fn write_stdout_raw(text: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(text.as_bytes()).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output stream failure.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
