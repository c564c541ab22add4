use thiserror::Error;

/// Top-level error type for the `areawatch-api` crate.
///
/// Covers wire encoding, frame decoding, and transport failures.
/// `areawatch-core` maps these into session-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection could not be established.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Transport handshake did not complete in time.
    #[error("Transport handshake timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The outbound half of a link is gone (transport instance torn down).
    #[error("Transport link is closed")]
    LinkClosed,

    /// Endpoint URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Wire ────────────────────────────────────────────────────────
    /// Outbound event could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Inbound frame was not a valid envelope, with the raw text for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Inbound frame named an event this client does not understand.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

impl Error {
    /// Returns `true` if a fresh transport instance might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::WebSocketClosed { .. }
                | Self::Timeout { .. }
                | Self::LinkClosed
        )
    }

    /// Returns `true` if this error came from a malformed or unexpected frame.
    pub fn is_wire(&self) -> bool {
        matches!(
            self,
            Self::Serialization(_) | Self::Deserialization { .. } | Self::UnknownEvent(_)
        )
    }
}
