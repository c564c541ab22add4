// Transport seam between the session core and a concrete wire.
//
// A `Connector` starts one transport instance per session attempt. The
// instance reports its lifecycle and inbound frames as `TransportEvent`s
// tagged with that attempt; the caller writes through the returned `Link`.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Sender half that transport instances report into.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half the session loop drains.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Lifecycle and data events produced by a transport instance.
///
/// Every variant carries the session attempt that opened the instance so
/// late events from a torn-down instance can be recognized and dropped.
#[derive(Debug)]
pub enum TransportEvent {
    /// Transport-level handshake completed; the link is writable.
    Opened { attempt: u64 },
    /// One inbound text frame, in transport order.
    Frame { attempt: u64, text: String },
    /// The peer closed the transport or the stream ended.
    Closed {
        attempt: u64,
        reason: Option<String>,
    },
    /// The transport could not be opened or broke mid-stream.
    Failed { attempt: u64, error: Error },
}

impl TransportEvent {
    pub fn attempt(&self) -> u64 {
        match self {
            Self::Opened { attempt }
            | Self::Frame { attempt, .. }
            | Self::Closed { attempt, .. }
            | Self::Failed { attempt, .. } => *attempt,
        }
    }
}

/// Outbound half of one transport instance.
///
/// Dropping or closing the link tears the instance down.
#[derive(Debug)]
pub struct Link {
    attempt: u64,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Link {
    pub fn new(
        attempt: u64,
        outbound: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            attempt,
            outbound,
            cancel,
        }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Queue one text frame for the peer.
    pub fn send_text(&self, text: String) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::LinkClosed);
        }
        self.outbound.send(text).map_err(|_| Error::LinkClosed)
    }

    /// Tear the instance down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Factory for transport instances.
///
/// `open` must not block: it starts the instance (typically by spawning a
/// task) and returns immediately. The outcome arrives on `events` as
/// [`TransportEvent::Opened`] or [`TransportEvent::Failed`].
pub trait Connector: Send + Sync + 'static {
    fn open(&self, attempt: u64, events: EventSender) -> Link;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn link_send_after_close_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = Link::new(3, tx, CancellationToken::new());

        link.send_text("a".into()).unwrap();
        link.close();

        assert!(matches!(link.send_text("b".into()), Err(Error::LinkClosed)));
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert!(link.is_closed());
    }

    #[test]
    fn dropping_link_cancels_instance() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        drop(Link::new(1, tx, cancel.clone()));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn event_attempt_accessor() {
        let event = TransportEvent::Closed {
            attempt: 7,
            reason: None,
        };
        assert_eq!(event.attempt(), 7);
    }
}
