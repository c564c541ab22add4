//! WebSocket transport.
//!
//! Each [`Connector::open`] spawns a task that owns one WebSocket stream for
//! a single session attempt. Inbound text frames are forwarded as
//! [`TransportEvent::Frame`]; outbound frames are read from the link's
//! channel. Reconnection is not handled here; the session core decides
//! when to open the next attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use areawatch_api::websocket::WebSocketConnector;
//! use url::Url;
//!
//! let connector = WebSocketConnector::new(Url::parse("wss://areas.example.com/ws")?);
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let link = connector.open(1, tx);
//! while let Some(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::{Connector, EventSender, Link, TransportEvent};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ── WebSocketConnector ───────────────────────────────────────────────

/// Opens one WebSocket per session attempt against a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Bound on the TCP + TLS + upgrade handshake.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, attempt: u64, events: EventSender) -> Link {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let url = self.url.clone();
        let timeout = self.handshake_timeout;
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome =
                connect_and_pump(&url, attempt, timeout, outbound_rx, &events, &task_cancel).await;
            let event = match outcome {
                Ok(reason) => TransportEvent::Closed { attempt, reason },
                Err(error) => TransportEvent::Failed { attempt, error },
            };
            // Receiver gone just means the session has shut down.
            let _ = events.send(event);
            tracing::debug!(attempt, "WebSocket task exiting");
        });

        Link::new(attempt, outbound_tx, cancel)
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket, then pump frames both ways until it drops.
///
/// Returns the close reason on a clean end of stream.
async fn connect_and_pump(
    url: &Url,
    attempt: u64,
    timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Result<Option<String>, Error> {
    tracing::info!(url = %url, attempt, "Connecting to WebSocket");

    let connect = tokio_tungstenite::connect_async(url.as_str());
    let (ws_stream, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(Some("closed by client".into())),
        result = tokio::time::timeout(timeout, connect) => match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            Err(_) => {
                return Err(Error::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        },
    };

    tracing::info!(attempt, "WebSocket connected");
    if events.send(TransportEvent::Opened { attempt }).is_err() {
        return Ok(None);
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Best effort: the peer may already be gone.
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(Some("closed by client".into()));
            }
            text = outbound.recv() => {
                let Some(text) = text else {
                    return Ok(Some("link dropped".into()));
                };
                tracing::trace!(attempt, bytes = text.len(), "WebSocket send");
                write
                    .send(tungstenite::Message::Text(text.into()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        tracing::trace!(attempt, bytes = text.len(), "WebSocket frame");
                        let event = TransportEvent::Frame { attempt, text: text.to_string() };
                        if events.send(event).is_err() {
                            return Ok(None);
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite queues the pong reply itself
                        tracing::trace!(attempt, "WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => {
                                tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                                Err(Error::WebSocketClosed {
                                    code: u16::from(cf.code),
                                    reason: cf.reason.to_string(),
                                })
                            }
                            None => {
                                tracing::info!("WebSocket close frame received (no payload)");
                                Ok(None)
                            }
                        };
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::info!(attempt, "WebSocket stream ended");
                        return Ok(None);
                    }
                    // Binary, Pong, raw frames: not part of the protocol
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
