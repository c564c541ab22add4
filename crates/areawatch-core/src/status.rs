// ── Presentable session status ──
//
// Folds connection, auth and query activity into the one state a UI needs
// to decide what to show.

use std::fmt;

use crate::auth::AuthState;
use crate::connection::ConnectionState;

/// Query bookkeeping published by the session loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryActivity {
    pub in_flight: usize,
    /// Term of the most recent search that timed out, cleared by the next
    /// answered search.
    pub last_timed_out: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not connected and not trying to be.
    Offline,
    Connecting,
    /// Transport is up; no credential accepted yet.
    Unauthenticated,
    Authenticating,
    Rejected { reason: Option<String> },
    /// Transport dropped (or came back and awaits re-authentication);
    /// shown data may be outdated.
    ConnectionLost,
    /// Reconnection gave up.
    Failed,
    Ready,
    QueryInProgress { in_flight: usize },
    QueryTimedOut { term: String },
}

impl SessionStatus {
    /// `was_open` tells a reconnect apart from a first connect: some
    /// transport instance opened since the last explicit `connect()`.
    pub fn derive(
        connection: ConnectionState,
        auth: &AuthState,
        activity: &QueryActivity,
        was_open: bool,
    ) -> Self {
        match connection {
            ConnectionState::Failed => Self::Failed,
            ConnectionState::Closed => Self::Offline,
            ConnectionState::Connecting if was_open => Self::ConnectionLost,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Open | ConnectionState::Reauthenticating => match auth {
                AuthState::Rejected { reason } => Self::Rejected {
                    reason: reason.clone(),
                },
                AuthState::Authenticating => Self::Authenticating,
                AuthState::Unauthenticated if connection == ConnectionState::Reauthenticating => {
                    Self::ConnectionLost
                }
                AuthState::Unauthenticated => Self::Unauthenticated,
                AuthState::Authenticated if activity.in_flight > 0 => Self::QueryInProgress {
                    in_flight: activity.in_flight,
                },
                AuthState::Authenticated => match &activity.last_timed_out {
                    Some(term) => Self::QueryTimedOut { term: term.clone() },
                    None => Self::Ready,
                },
            },
        }
    }

    /// Whether the UI should flag its data as possibly outdated.
    pub fn shows_stale_data(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("offline"),
            Self::Connecting => f.write_str("connecting"),
            Self::Unauthenticated => f.write_str("not authenticated"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Rejected { reason: Some(r) } => write!(f, "authentication rejected: {r}"),
            Self::Rejected { reason: None } => f.write_str("authentication rejected"),
            Self::ConnectionLost => f.write_str("connection lost, showing last known data"),
            Self::Failed => f.write_str("connection failed"),
            Self::Ready => f.write_str("ready"),
            Self::QueryInProgress { in_flight } => write!(f, "searching ({in_flight} in flight)"),
            Self::QueryTimedOut { term } => write!(f, "search for '{term}' timed out"),
        }
    }
}
