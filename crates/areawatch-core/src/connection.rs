// ── Connection manager ──
//
// Owns the single persistent transport. Drives the lifecycle state machine
// (connect, reconnect-with-backoff, close), tags every transport instance
// with a session attempt, drops events from stale instances, decodes
// inbound frames and fans them out to message consumers.
//
// The manager is not a task of its own: the session loop feeds it
// transport events and reconnect timers, and acts on the returned
// `ConnectionUpdate`.

use std::sync::Arc;
use std::time::Duration;

use areawatch_api::{ClientEvent, Connector, EventReceiver, EventSender, Link, ServerEvent, TransportEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::config::ReconnectConfig;
use crate::error::SessionError;

/// Callback registered through `on_message`.
pub type MessageHandler = Box<dyn Fn(&ServerEvent) + Send + Sync>;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// A transport attempt (first or reconnect) is under way, or the next
    /// one is waiting out its backoff delay.
    Connecting,
    Open,
    /// Transport is back after a loss; waiting for the new handshake.
    Reauthenticating,
    Closed,
    /// Reconnection budget exhausted. Terminal until `connect()` is called again.
    Failed,
}

impl ConnectionState {
    /// Whether outbound events may be written.
    pub fn can_send(self) -> bool {
        matches!(self, Self::Open | Self::Reauthenticating)
    }
}

/// What the manager decided after a transport loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Call [`ConnectionManager::retry`] with `after` once `delay` has passed.
    Retry { after: u64, delay: Duration },
    /// Retry budget exhausted; the manager is now `Failed`.
    GiveUp { attempts: u32 },
}

/// Result of feeding one transport event to the manager.
#[derive(Debug, Clone)]
pub enum ConnectionUpdate {
    /// Stale attempt, undecodable frame or post-close noise.
    Ignored,
    Opened { attempt: u64, recovered: bool },
    Message(Arc<ServerEvent>),
    Lost(Recovery),
}

// ── ConnectionManager ────────────────────────────────────────────

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    events_tx: EventSender,
    link: Option<Link>,
    attempt: u64,
    /// Consecutive failed attempts since the last successful open.
    failures: u32,
    /// An instance opened at least once since the last `connect()`. A
    /// `Connecting` state with this set is a recovery, not a first connect.
    was_open: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    messages: broadcast::Sender<Arc<ServerEvent>>,
    handlers: Vec<MessageHandler>,
}

impl ConnectionManager {
    /// Create a closed manager. Transport events for every instance it
    /// opens arrive on the returned receiver.
    pub fn new(
        connector: Arc<dyn Connector>,
        reconnect: ReconnectConfig,
        messages: broadcast::Sender<Arc<ServerEvent>>,
    ) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (was_open, _) = watch::channel(false);
        let manager = Self {
            connector,
            reconnect,
            events_tx,
            link: None,
            attempt: 0,
            failures: 0,
            was_open,
            state,
            messages,
            handlers: Vec::new(),
        };
        (manager, events_rx)
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn watch_was_open(&self) -> watch::Receiver<bool> {
        self.was_open.subscribe()
    }

    /// Session attempt of the current (or most recent) transport instance.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start a fresh connection. Resets the retry budget.
    ///
    /// Returns the attempt number of the new transport instance.
    pub fn connect(&mut self) -> u64 {
        self.failures = 0;
        self.was_open.send_replace(false);
        self.open_instance()
    }

    /// Open the next instance after a backoff delay.
    ///
    /// `after` is the attempt whose loss scheduled this retry; the call is a
    /// no-op if anything else happened since (close, manual connect).
    pub fn retry(&mut self, after: u64) -> Option<u64> {
        if after != self.attempt || self.link.is_some() || self.state() != ConnectionState::Connecting {
            debug!(after, current = self.attempt, "ignoring superseded reconnect");
            return None;
        }
        Some(self.open_instance())
    }

    /// Tear the transport down and move to `Closed`.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.failures = 0;
        self.set_state(ConnectionState::Closed);
        info!(attempt = self.attempt, "connection closed");
    }

    /// The handshake on a recovered instance succeeded.
    pub fn reauthenticated(&mut self) {
        if self.state() == ConnectionState::Reauthenticating {
            self.set_state(ConnectionState::Open);
        }
    }

    fn open_instance(&mut self) -> u64 {
        if let Some(old) = self.link.take() {
            old.close();
        }
        self.attempt += 1;
        self.set_state(ConnectionState::Connecting);
        info!(
            endpoint = %self.connector.endpoint(),
            attempt = self.attempt,
            "opening transport"
        );
        self.link = Some(self.connector.open(self.attempt, self.events_tx.clone()));
        self.attempt
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "connection state");
            *current = next;
            true
        });
    }

    // ── Transport events ─────────────────────────────────────────

    pub fn on_transport_event(&mut self, event: TransportEvent) -> ConnectionUpdate {
        if event.attempt() != self.attempt || self.link.is_none() {
            debug!(
                event_attempt = event.attempt(),
                current = self.attempt,
                "dropping event from stale transport"
            );
            return ConnectionUpdate::Ignored;
        }

        match event {
            TransportEvent::Opened { attempt } => {
                let recovered = self.was_open.send_replace(true);
                self.failures = 0;
                self.set_state(if recovered {
                    ConnectionState::Reauthenticating
                } else {
                    ConnectionState::Open
                });
                info!(attempt, recovered, "transport open");
                ConnectionUpdate::Opened { attempt, recovered }
            }
            TransportEvent::Frame { attempt, text } => match ServerEvent::decode(&text) {
                Ok(message) => {
                    trace!(attempt, event = message.name(), "inbound");
                    let message = Arc::new(message);
                    for handler in &self.handlers {
                        handler(&message);
                    }
                    // No subscribers is fine.
                    let _ = self.messages.send(Arc::clone(&message));
                    ConnectionUpdate::Message(message)
                }
                Err(e) => {
                    debug!(attempt, error = %e, "dropping undecodable frame");
                    ConnectionUpdate::Ignored
                }
            },
            TransportEvent::Closed { attempt, reason } => {
                warn!(attempt, reason = reason.as_deref().unwrap_or("none"), "transport closed");
                ConnectionUpdate::Lost(self.on_loss())
            }
            TransportEvent::Failed { attempt, error } => {
                warn!(attempt, error = %error, "transport failed");
                ConnectionUpdate::Lost(self.on_loss())
            }
        }
    }

    fn on_loss(&mut self) -> Recovery {
        self.link = None;
        self.failures += 1;

        if let Some(max) = self.reconnect.max_retries {
            if self.failures > max {
                warn!(attempts = self.failures, "giving up on reconnection");
                self.set_state(ConnectionState::Failed);
                return Recovery::GiveUp {
                    attempts: self.failures,
                };
            }
        }

        let delay = calculate_backoff(self.failures - 1, &self.reconnect);
        info!(
            failures = self.failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        self.set_state(ConnectionState::Connecting);
        Recovery::Retry {
            after: self.attempt,
            delay,
        }
    }

    // ── Messaging ────────────────────────────────────────────────

    /// Write one event on the live transport.
    pub fn send(&self, event: &ClientEvent) -> Result<(), SessionError> {
        let link = match (&self.link, self.state().can_send()) {
            (Some(link), true) => link,
            _ => return Err(SessionError::NotConnected),
        };
        let text = event.encode()?;
        trace!(attempt = self.attempt, event = event.name(), "outbound");
        link.send_text(text)?;
        Ok(())
    }

    /// Register a callback invoked for every decoded inbound event.
    pub fn on_message(&mut self, handler: MessageHandler) {
        self.handlers.push(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.messages.subscribe()
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Exponential backoff with deterministic jitter of ±25 %.
///
/// `failure` is zero-based: the first retry waits `initial_delay`.
pub fn calculate_backoff(failure: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(failure).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Seeded from the failure count so the spread is reproducible.
    let jitter_factor = 1.0 + 0.25 * (f64::from(failure) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────
