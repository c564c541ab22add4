// ── Session root ──
//
// Wires the connection manager, authentication session, query channel and
// area store together. All of them are owned by one event-loop task; the
// cloneable `Session` handle talks to it through a command channel and
// reads state through `watch` receivers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use areawatch_api::{ClientEvent, Connector, EventReceiver, ServerEvent, WebSocketConnector};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthOutcome, AuthSession, AuthState};
use crate::config::{AuthCredential, SessionConfig};
use crate::connection::{ConnectionManager, ConnectionState, ConnectionUpdate, MessageHandler, Recovery};
use crate::convert::normalize_batch;
use crate::error::SessionError;
use crate::model::{AreaRecord, UpdateSource};
use crate::query::{CorrelationId, QueryChannel, Resolution, SearchReply};
use crate::status::{QueryActivity, SessionStatus};
use crate::store::{AreaReader, AreaSnapshot, AreaStore};

const COMMAND_CHANNEL_SIZE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Connect(Reply<()>),
    Authenticate {
        credential: AuthCredential,
        reply: Reply<()>,
    },
    Search {
        term: String,
        reply: SearchReply,
    },
    OnMessage(MessageHandler),
    Close(Reply<()>),
}

enum Timer {
    Reconnect { after: u64 },
    AuthTimeout { handshake: u64 },
    QueryTimeout { id: CorrelationId },
}

// ── Session ──────────────────────────────────────────────────────

/// The main entry point for UI surfaces.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Dropping the last clone stops
/// the event loop and closes the transport.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    endpoint: String,
    store: Arc<AreaStore>,
    connection_state: watch::Receiver<ConnectionState>,
    was_open: watch::Receiver<bool>,
    auth_state: watch::Receiver<AuthState>,
    activity: watch::Receiver<QueryActivity>,
    messages: broadcast::Sender<Arc<ServerEvent>>,
    command_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Session {
    /// Create a session over `connector` and start its event loop. Does NOT
    /// connect; call [`connect()`](Self::connect).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig, connector: impl Connector) -> Self {
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let endpoint = connector.endpoint();
        let store = Arc::new(AreaStore::new());
        let (messages, _) = broadcast::channel(config.message_buffer.max(1));
        let (connection, transport_rx) =
            ConnectionManager::new(connector, config.reconnect.clone(), messages.clone());
        let auth = AuthSession::new();
        let (activity_tx, activity) = watch::channel(QueryActivity::default());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let inner = SessionInner {
            config: config.clone(),
            endpoint,
            store: Arc::clone(&store),
            connection_state: connection.watch_state(),
            was_open: connection.watch_was_open(),
            auth_state: auth.watch_state(),
            activity,
            messages,
            command_tx,
            cancel: cancel.clone(),
        };

        let event_loop = SessionLoop {
            config,
            connection,
            auth,
            queries: QueryChannel::new(),
            store,
            activity: activity_tx,
            last_timed_out: None,
            connect_waiters: Vec::new(),
            timer_tx,
            cancel,
        };
        tokio::spawn(event_loop.run(transport_rx, command_rx, timer_rx));

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Session over a WebSocket to `config.url`.
    pub fn with_websocket(config: SessionConfig) -> Self {
        let connector = WebSocketConnector::new(config.url.clone())
            .with_handshake_timeout(config.connect_timeout);
        Self::new(config, connector)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    // ── Operations ───────────────────────────────────────────────

    /// Open the connection. Resolves once the transport is open, or with
    /// `TransportFailed` after the retry budget is spent.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(Command::Connect).await
    }

    /// Submit a credential and wait for `auth:result`.
    pub async fn authenticate(&self, credential: AuthCredential) -> Result<(), SessionError> {
        self.request(|reply| Command::Authenticate { credential, reply })
            .await
    }

    /// Search for countries matching `term`. The records carried by the
    /// response are merged into the store before this resolves.
    pub async fn search(&self, term: &str) -> Result<Vec<AreaRecord>, SessionError> {
        let term = term.to_owned();
        self.request(|reply| Command::Search { term, reply }).await
    }

    /// Register a callback for every inbound event, in transport order.
    pub async fn on_message<F>(&self, handler: F) -> Result<(), SessionError>
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.inner
            .command_tx
            .send(Command::OnMessage(Box::new(handler)))
            .await
            .map_err(|_| SessionError::Shutdown)
    }

    /// Tear the transport down. Pending auth and searches fail with
    /// `NotConnected`; the store keeps its data, marked stale.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.request(Command::Close).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    // ── One-shot convenience ─────────────────────────────────────

    /// Connect, authenticate, run `f`, close.
    pub async fn oneshot<F, Fut, T>(
        config: SessionConfig,
        connector: impl Connector,
        credential: AuthCredential,
        f: F,
    ) -> Result<T, SessionError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let session = Session::new(config, connector);
        session.connect().await?;
        session.authenticate(credential).await?;
        let result = f(session.clone()).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "close after one-shot failed");
        }
        result
    }

    // ── State observation ────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.clone()
    }

    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.inner.auth_state.clone()
    }

    pub fn query_activity(&self) -> watch::Receiver<QueryActivity> {
        self.inner.activity.clone()
    }

    /// Every decoded inbound event, in transport order.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.inner.messages.subscribe()
    }

    /// Read-only handle to the area state.
    pub fn store(&self) -> AreaReader {
        AreaReader::new(Arc::clone(&self.inner.store))
    }

    pub fn snapshot(&self) -> Arc<AreaSnapshot> {
        self.inner.store.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        let connection = *self.inner.connection_state.borrow();
        let auth = self.inner.auth_state.borrow().clone();
        let activity = self.inner.activity.borrow().clone();
        let was_open = *self.inner.was_open.borrow();
        SessionStatus::derive(connection, &auth, &activity, was_open)
    }
}

// ── Event loop ───────────────────────────────────────────────────

struct SessionLoop {
    config: SessionConfig,
    connection: ConnectionManager,
    auth: AuthSession,
    queries: QueryChannel,
    store: Arc<AreaStore>,
    activity: watch::Sender<QueryActivity>,
    last_timed_out: Option<String>,
    connect_waiters: Vec<Reply<()>>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    cancel: CancellationToken,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut transport_rx: EventReceiver,
        mut command_rx: mpsc::Receiver<Command>,
        mut timer_rx: mpsc::UnboundedReceiver<Timer>,
    ) {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(event) = transport_rx.recv() => {
                    let update = self.connection.on_transport_event(event);
                    self.on_connection_update(update);
                }
                Some(timer) = timer_rx.recv() => self.on_timer(timer),
                command = command_rx.recv() => {
                    let Some(command) = command else { break };
                    self.on_command(command);
                }
            }
        }

        if self.connection.state() != ConnectionState::Closed {
            self.connection.close();
        }
        debug!("session loop exiting");
    }

    // ── Commands ─────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.connect(reply),
            Command::Authenticate { credential, reply } => self.authenticate(&credential, reply),
            Command::Search { term, reply } => self.search(&term, reply),
            Command::OnMessage(handler) => self.connection.on_message(handler),
            Command::Close(reply) => {
                self.close(&SessionError::NotConnected);
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn connect(&mut self, reply: Reply<()>) {
        match self.connection.state() {
            ConnectionState::Open | ConnectionState::Reauthenticating => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => self.connect_waiters.push(reply),
            ConnectionState::Closed | ConnectionState::Failed => {
                self.connect_waiters.push(reply);
                self.connection.connect();
            }
        }
    }

    fn authenticate(&mut self, credential: &AuthCredential, reply: Reply<()>) {
        if let Err(e) = self.ensure_not_failed() {
            let _ = reply.send(Err(e));
            return;
        }
        let handshake = match self.auth.begin(self.connection.state()) {
            Ok(handshake) => handshake,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        if let Err(e) = self.connection.send(&ClientEvent::AuthSubmit(credential.to_wire())) {
            self.auth.abort(handshake);
            let _ = reply.send(Err(e));
            return;
        }
        self.auth.await_result(handshake, reply);
        self.schedule(self.config.auth_timeout, Timer::AuthTimeout { handshake });
    }

    fn search(&mut self, term: &str, reply: SearchReply) {
        if let Err(e) = self.ensure_not_failed() {
            let _ = reply.send(Err(e));
            return;
        }
        let prepared = match QueryChannel::prepare(&self.auth.state(), term) {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        if let Err(e) = self.connection.send(&prepared.event) {
            let _ = reply.send(Err(e));
            return;
        }
        let id = prepared.id;
        self.queries
            .track(id.clone(), prepared.term, self.connection.attempt(), reply);
        self.schedule(self.config.query_timeout, Timer::QueryTimeout { id });
        self.publish_activity();
    }

    fn close(&mut self, error: &SessionError) {
        self.connection.close();
        self.auth.reset(error);
        self.queries.fail_all(error);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.store.mark_stale();
        self.publish_activity();
    }

    fn ensure_not_failed(&self) -> Result<(), SessionError> {
        if self.connection.state() == ConnectionState::Failed {
            return Err(SessionError::TransportFailed {
                attempts: self.connection.failures(),
            });
        }
        Ok(())
    }

    // ── Connection events ────────────────────────────────────────

    fn on_connection_update(&mut self, update: ConnectionUpdate) {
        match update {
            ConnectionUpdate::Ignored => {}
            ConnectionUpdate::Opened { attempt, recovered } => {
                // Every transport instance starts unauthenticated.
                self.auth.reset(&SessionError::NotConnected);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                if recovered {
                    info!(attempt, "reconnected, awaiting re-authentication");
                }
            }
            ConnectionUpdate::Message(message) => self.on_message(&message),
            ConnectionUpdate::Lost(recovery) => {
                self.store.mark_stale();
                match recovery {
                    Recovery::Retry { after, delay } => {
                        self.auth.reset(&SessionError::NotConnected);
                        self.schedule(delay, Timer::Reconnect { after });
                    }
                    Recovery::GiveUp { attempts } => {
                        let error = SessionError::TransportFailed { attempts };
                        self.auth.reset(&error);
                        self.queries.fail_all(&error);
                        for waiter in self.connect_waiters.drain(..) {
                            let _ = waiter.send(Err(error.clone()));
                        }
                        self.publish_activity();
                    }
                }
            }
        }
    }

    fn on_message(&mut self, message: &ServerEvent) {
        if message.is_data() && !self.auth.is_authenticated() {
            debug!(event = message.name(), "discarding data received while not authenticated");
            return;
        }

        match message {
            ServerEvent::AuthResult(result) => {
                if self.auth.on_result(result) == Some(AuthOutcome::Authenticated) {
                    self.connection.reauthenticated();
                    if self.config.sync_on_auth {
                        if let Err(e) = self.connection.send(&ClientEvent::CountrySync) {
                            warn!(error = %e, "failed to request full sync");
                        }
                    }
                }
            }
            ServerEvent::CountryPush(batch) => {
                self.store
                    .apply_update(normalize_batch(&batch.records), UpdateSource::Push);
            }
            ServerEvent::CountryResult(result) => {
                match self
                    .queries
                    .resolve(&result.correlation_id, self.connection.attempt())
                {
                    Resolution::Matched(pending) => {
                        let updates = normalize_batch(&result.records);
                        let records = updates
                            .iter()
                            .cloned()
                            .map(|u| AreaRecord::from_update(u, UpdateSource::QueryResponse))
                            .collect();
                        self.store.apply_update(updates, UpdateSource::QueryResponse);
                        debug!(term = %pending.term, "query answered");
                        let _ = pending.reply.send(Ok(records));
                        self.last_timed_out = None;
                        self.publish_activity();
                    }
                    Resolution::StaleAttempt { issued } => {
                        debug!(
                            correlation_id = %result.correlation_id,
                            issued,
                            current = self.connection.attempt(),
                            "discarding response issued under another session attempt"
                        );
                    }
                    Resolution::Unknown => {
                        debug!(
                            correlation_id = %result.correlation_id,
                            "discarding response with no outstanding request"
                        );
                    }
                }
            }
        }
    }

    // ── Timers ───────────────────────────────────────────────────

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Reconnect { after } => {
                self.connection.retry(after);
            }
            Timer::AuthTimeout { handshake } => {
                self.auth
                    .on_timeout(handshake, millis(self.config.auth_timeout));
            }
            Timer::QueryTimeout { id } => {
                if let Some(pending) = self.queries.expire(&id) {
                    let timeout_ms = millis(self.config.query_timeout);
                    warn!(term = %pending.term, timeout_ms, "query timed out");
                    self.last_timed_out = Some(pending.term.to_string());
                    let _ = pending.reply.send(Err(SessionError::QueryTimeout { timeout_ms }));
                    self.publish_activity();
                }
            }
        }
    }

    fn schedule(&self, delay: Duration, timer: Timer) {
        let tx = self.timer_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(timer);
                }
            }
        });
    }

    fn publish_activity(&self) {
        let next = QueryActivity {
            in_flight: self.queries.in_flight(),
            last_timed_out: self.last_timed_out.clone(),
        };
        self.activity.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
