//! CLI error types with miette diagnostics.
//!
//! Maps `SessionError` and `ConfigError` into user-facing errors with
//! actionable help text and a distinct exit code per failure class.

use miette::Diagnostic;
use thiserror::Error;

use areawatch_config::ConfigError;
use areawatch_core::SessionError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the server at {endpoint}")]
    #[diagnostic(
        code(areawatch::connection_failed),
        help(
            "Check that the server is running and the endpoint is correct.\n\
             Reconnection gave up after {attempts} attempts."
        )
    )]
    ConnectionFailed { endpoint: String, attempts: u32 },

    #[error("Not connected to the server")]
    #[diagnostic(
        code(areawatch::not_connected),
        help("The connection dropped before the request completed. Try again.")
    )]
    NotConnected,

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication rejected{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    #[diagnostic(
        code(areawatch::auth_rejected),
        help(
            "Verify your token.\n\
             Run: areawatch config set-token --profile {profile}"
        )
    )]
    AuthRejected {
        profile: String,
        reason: Option<String>,
    },

    #[error("Not authenticated")]
    #[diagnostic(code(areawatch::unauthorized))]
    Unauthorized,

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(areawatch::no_credentials),
        help(
            "Configure a token with: areawatch config set-token\n\
             Or pass --token / set AREAWATCH_TOKEN."
        )
    )]
    NoCredentials { profile: String },

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("{operation} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(areawatch::timeout),
        help("Raise auth_timeout_ms / query_timeout_ms in your profile or check server responsiveness.")
    )]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(areawatch::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(areawatch::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: areawatch config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No endpoint configured")]
    #[diagnostic(
        code(areawatch::no_config),
        help(
            "Create a profile with: areawatch config init\n\
             Or pass --endpoint ws://host:port\n\
             Config expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(areawatch::config))]
    Config(ConfigError),

    // ── Session ──────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(areawatch::session))]
    Session(SessionError),

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected => exit_code::CONNECTION,
            Self::AuthRejected { .. } | Self::Unauthorized | Self::NoCredentials { .. } => {
                exit_code::AUTH
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::NoConfig { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }

    /// Attach the connection context a bare `SessionError` lacks.
    pub fn from_session(err: SessionError, endpoint: &str, profile: &str) -> Self {
        match err {
            SessionError::TransportFailed { attempts } => Self::ConnectionFailed {
                endpoint: endpoint.into(),
                attempts,
            },
            SessionError::AuthRejected { reason } => Self::AuthRejected {
                profile: profile.into(),
                reason,
            },
            other => other.into(),
        }
    }
}

// ── SessionError → CliError mapping ──────────────────────────────────

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotConnected => CliError::NotConnected,
            SessionError::TransportFailed { attempts } => CliError::ConnectionFailed {
                endpoint: "(unknown)".into(),
                attempts,
            },
            SessionError::AuthTimeout { timeout_ms } => CliError::Timeout {
                operation: "Authentication",
                timeout_ms,
            },
            SessionError::QueryTimeout { timeout_ms } => CliError::Timeout {
                operation: "Search",
                timeout_ms,
            },
            SessionError::AuthRejected { reason } => CliError::AuthRejected {
                profile: "current".into(),
                reason,
            },
            SessionError::Unauthorized => CliError::Unauthorized,
            SessionError::InvalidQuery { reason } => CliError::Validation {
                field: "search term".into(),
                reason,
            },
            other => CliError::Session(other),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
