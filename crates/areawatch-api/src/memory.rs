//! In-process transport for tests (`test-util` feature).
//!
//! [`memory_pair`] returns a [`MemoryConnector`] to hand to the session and a
//! [`MemoryServer`] that plays the server side: it sees each session attempt
//! as a [`PendingConn`], chooses to accept or refuse it, then reads client
//! events and writes server events on the resulting [`ServerConn`]. Nothing
//! happens unless the server side drives it, so tests stay deterministic.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::transport::{Connector, EventSender, Link, TransportEvent};

/// Create a connected connector/server pair.
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { accept_tx },
        MemoryServer { accept_rx },
    )
}

// ── Client side ──────────────────────────────────────────────────────

/// Connector whose transport instances terminate in a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<PendingConn>,
}

impl Connector for MemoryConnector {
    fn open(&self, attempt: u64, events: EventSender) -> Link {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let pending = PendingConn {
            attempt,
            events,
            outbound_rx,
            cancel: cancel.clone(),
        };
        if let Err(mpsc::error::SendError(pending)) = self.accept_tx.send(pending) {
            pending.refuse("memory server is gone");
        }

        Link::new(attempt, outbound_tx, cancel)
    }

    fn endpoint(&self) -> String {
        "memory://server".into()
    }
}

// ── Server side ──────────────────────────────────────────────────────

/// Server half of a [`memory_pair`].
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<PendingConn>,
}

impl MemoryServer {
    /// Wait for the client's next transport attempt.
    pub async fn next_attempt(&mut self) -> Option<PendingConn> {
        self.accept_rx.recv().await
    }

    /// Wait for the next attempt and accept it.
    pub async fn accept(&mut self) -> Option<ServerConn> {
        self.next_attempt().await.map(PendingConn::accept)
    }

    /// Non-blocking check for an attempt that has already been made.
    pub fn try_next_attempt(&mut self) -> Option<PendingConn> {
        self.accept_rx.try_recv().ok()
    }
}

/// A transport attempt that has not completed its handshake yet.
#[derive(Debug)]
pub struct PendingConn {
    attempt: u64,
    events: EventSender,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl PendingConn {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Complete the handshake; the client sees the link open.
    pub fn accept(self) -> ServerConn {
        let _ = self.events.send(TransportEvent::Opened {
            attempt: self.attempt,
        });
        ServerConn {
            attempt: self.attempt,
            events: self.events,
            outbound_rx: self.outbound_rx,
            cancel: self.cancel,
        }
    }

    /// Fail the handshake.
    pub fn refuse(self, reason: &str) {
        let _ = self.events.send(TransportEvent::Failed {
            attempt: self.attempt,
            error: Error::WebSocketConnect(reason.to_owned()),
        });
    }
}

/// Server view of one open transport instance.
#[derive(Debug)]
pub struct ServerConn {
    attempt: u64,
    events: EventSender,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl ServerConn {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Next event the client sent, or `None` once the client closed the link.
    ///
    /// Frames that fail to decode are returned as errors so tests can assert
    /// on them.
    pub async fn recv(&mut self) -> Option<Result<ClientEvent, Error>> {
        tokio::select! {
            biased;
            text = self.outbound_rx.recv() => text.map(|t| ClientEvent::decode(&t)),
            () = self.cancel.cancelled() => {
                self.outbound_rx.try_recv().ok().map(|t| ClientEvent::decode(&t))
            }
        }
    }

    /// An already-sent client event, without waiting.
    pub fn try_recv(&mut self) -> Option<Result<ClientEvent, Error>> {
        self.outbound_rx.try_recv().ok().map(|t| ClientEvent::decode(&t))
    }

    /// Deliver a server event to the client, tagged with this instance's attempt.
    pub fn send(&self, event: &ServerEvent) -> Result<(), Error> {
        self.send_raw(event.encode()?)
    }

    /// Deliver an arbitrary text frame, e.g. a malformed one.
    pub fn send_raw(&self, text: String) -> Result<(), Error> {
        self.events
            .send(TransportEvent::Frame {
                attempt: self.attempt,
                text,
            })
            .map_err(|_| Error::LinkClosed)
    }

    /// Simulate an unexpected transport loss.
    ///
    /// The connection object stays usable so a test can still deliver
    /// late frames tagged with this (now stale) attempt.
    pub fn drop_connection(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Closed {
            attempt: self.attempt,
            reason: Some(reason.to_owned()),
        });
    }

    /// Whether the client tore this instance down.
    pub fn closed_by_client(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
