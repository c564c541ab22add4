// ── Runtime session configuration ──
//
// These types describe *how* to talk to the area server. They carry
// connection tuning and the credential wrapper, but never touch disk.
// The CLI constructs a `SessionConfig` and hands it in.

use std::time::Duration;

use areawatch_api::Credential;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Opaque token submitted during the auth handshake.
///
/// Held as a secret; the core converts it to a wire credential only for the
/// handshake that carries it and never stores it afterwards.
#[derive(Debug, Clone)]
pub struct AuthCredential(SecretString);

impl AuthCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub(crate) fn to_wire(&self) -> Credential {
        Credential::new(self.0.expose_secret())
    }
}

impl From<SecretString> for AuthCredential {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

/// Reconnection policy after an unexpected transport loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the (pre-jitter) backoff delay.
    pub max_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: Some(10),
        }
    }
}

/// Configuration for one synchronized session.
///
/// Built by the CLI, passed to `Session`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server endpoint (e.g. `wss://areas.example.com/ws`).
    pub url: Url,
    /// How long to wait for `auth:result`.
    pub auth_timeout: Duration,
    /// How long to wait for a `country:result`.
    pub query_timeout: Duration,
    /// Bound on the transport handshake.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Request a full push after every successful authentication.
    pub sync_on_auth: bool,
    /// Capacity of the inbound-message broadcast channel.
    pub message_buffer: usize,
}

impl SessionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            auth_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            sync_on_auth: true,
            message_buffer: 1024,
        }
    }
}
