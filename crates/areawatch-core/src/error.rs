// ── Core error types ──
//
// User-facing errors from areawatch-core. Individual transport hiccups are
// retried inside the connection manager and never show up here; only the
// terminal `TransportFailed` does. The `From<areawatch_api::Error>` impl
// translates wire-layer errors into session variants.

use thiserror::Error;

/// Unified error type for the session core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Not connected to the server")]
    NotConnected,

    #[error("Transport failed after {attempts} reconnection attempts")]
    TransportFailed { attempts: u32 },

    // ── Authentication errors ────────────────────────────────────────
    #[error("Authentication timed out after {timeout_ms}ms")]
    AuthTimeout { timeout_ms: u64 },

    #[error("Authentication rejected{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    AuthRejected { reason: Option<String> },

    #[error("Not authenticated")]
    Unauthorized,

    // ── Query errors ─────────────────────────────────────────────────
    #[error("Query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Session has shut down")]
    Shutdown,
}

impl SessionError {
    /// The connection is gone for good; dependents must stop issuing requests.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TransportFailed { .. } | Self::Shutdown)
    }

    /// The user has to act (new credential, manual retry) before trying again.
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            Self::AuthRejected { .. }
                | Self::AuthTimeout { .. }
                | Self::Unauthorized
                | Self::QueryTimeout { .. }
                | Self::InvalidQuery { .. }
        )
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<areawatch_api::Error> for SessionError {
    fn from(err: areawatch_api::Error) -> Self {
        match err {
            areawatch_api::Error::LinkClosed
            | areawatch_api::Error::WebSocketConnect(_)
            | areawatch_api::Error::WebSocketClosed { .. }
            | areawatch_api::Error::Timeout { .. } => SessionError::NotConnected,
            areawatch_api::Error::InvalidUrl(e) => SessionError::Protocol {
                message: format!("Invalid URL: {e}"),
            },
            areawatch_api::Error::Serialization(e) => SessionError::Protocol {
                message: e.to_string(),
            },
            areawatch_api::Error::Deserialization { message, body: _ } => {
                SessionError::Protocol { message }
            }
            areawatch_api::Error::UnknownEvent(name) => SessionError::Protocol {
                message: format!("unknown event '{name}'"),
            },
        }
    }
}
