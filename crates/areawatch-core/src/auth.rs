// ── Authentication session ──
//
// Credential handshake state machine. Gates every data operation: inbound
// country data is trusted only while `Authenticated`. The state restarts
// from `Unauthenticated` on every new transport instance; credentials are
// never cached or replayed.

use areawatch_api::protocol::AuthResult;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::connection::ConnectionState;
use crate::error::SessionError;

type Waiter = oneshot::Sender<Result<(), SessionError>>;

/// Authentication state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Rejected { reason: Option<String> },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// How an `auth:result` was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Rejected,
}

pub struct AuthSession {
    state: watch::Sender<AuthState>,
    /// Bumped on every handshake and reset so stale timeouts are recognized.
    handshake: u64,
    waiter: Option<Waiter>,
}

impl AuthSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            state,
            handshake: 0,
            waiter: None,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Start a handshake. Returns its id, used to match the timeout.
    ///
    /// Requires a writable transport and a state of `Unauthenticated` or
    /// `Rejected`. The caller sends `auth:submit` and then hands the reply
    /// channel over with [`await_result`](Self::await_result).
    pub fn begin(&mut self, connection: ConnectionState) -> Result<u64, SessionError> {
        if !connection.can_send() {
            return Err(SessionError::NotConnected);
        }
        let current = self.state();
        if !matches!(current, AuthState::Unauthenticated | AuthState::Rejected { .. }) {
            return Err(SessionError::InvalidState {
                operation: "authenticate",
                state: current.to_string(),
            });
        }

        self.handshake += 1;
        self.state.send_replace(AuthState::Authenticating);
        debug!(handshake = self.handshake, "auth handshake started");
        Ok(self.handshake)
    }

    /// Park the caller until the result, timeout or reset.
    pub fn await_result(&mut self, handshake: u64, waiter: Waiter) {
        if handshake != self.handshake {
            let _ = waiter.send(Err(SessionError::NotConnected));
            return;
        }
        self.waiter = Some(waiter);
    }

    /// The `auth:submit` could not be written; undo `begin`.
    pub fn abort(&mut self, handshake: u64) {
        if handshake == self.handshake && *self.state.borrow() == AuthState::Authenticating {
            self.state.send_replace(AuthState::Unauthenticated);
        }
    }

    /// Apply an inbound `auth:result`. Returns `None` if no handshake was
    /// in progress.
    pub fn on_result(&mut self, result: &AuthResult) -> Option<AuthOutcome> {
        if *self.state.borrow() != AuthState::Authenticating {
            debug!(success = result.success, "ignoring unsolicited auth:result");
            return None;
        }

        let (next, reply, outcome) = if result.success {
            info!("authenticated");
            (AuthState::Authenticated, Ok(()), AuthOutcome::Authenticated)
        } else {
            warn!(reason = result.reason.as_deref().unwrap_or("none"), "authentication rejected");
            (
                AuthState::Rejected {
                    reason: result.reason.clone(),
                },
                Err(SessionError::AuthRejected {
                    reason: result.reason.clone(),
                }),
                AuthOutcome::Rejected,
            )
        };
        self.state.send_replace(next);
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(reply);
        }
        Some(outcome)
    }

    /// The auth timer for `handshake` fired. Returns `true` if it was still
    /// pending and has now failed.
    pub fn on_timeout(&mut self, handshake: u64, timeout_ms: u64) -> bool {
        if handshake != self.handshake || *self.state.borrow() != AuthState::Authenticating {
            return false;
        }
        warn!(timeout_ms, "authentication timed out");
        self.state.send_replace(AuthState::Unauthenticated);
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(SessionError::AuthTimeout { timeout_ms }));
        }
        true
    }

    /// Drop back to `Unauthenticated`, failing a pending handshake with `error`.
    pub fn reset(&mut self, error: &SessionError) {
        self.handshake += 1;
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(error.clone()));
        }
        self.state.send_if_modified(|state| {
            if *state == AuthState::Unauthenticated {
                return false;
            }
            debug!(from = %state, "auth state reset");
            *state = AuthState::Unauthenticated;
            true
        });
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
