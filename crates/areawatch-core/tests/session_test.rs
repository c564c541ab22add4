#![allow(clippy::unwrap_used)]
// Integration tests for `Session` over the in-memory transport.
//
// Time is paused, so backoff delays and timeouts elapse instantly once
// every task is idle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use url::Url;

use areawatch_api::memory::{MemoryServer, ServerConn, memory_pair};
use areawatch_api::protocol::{AuthResult, PushBatch, SearchResult};
use areawatch_api::{ClientEvent, Credential, ServerEvent, WireRecord};
use areawatch_core::{
    AreaSnapshot, AuthCredential, AuthState, ConnectionState, CountryId, ReconnectConfig, Session,
    SessionConfig, SessionError, SessionStatus, UpdateSource,
};

const T: i64 = 1_700_000_000_000;

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> SessionConfig {
    let mut config = SessionConfig::new(Url::parse("ws://areas.test/ws").unwrap());
    config.sync_on_auth = false;
    config
}

fn setup(config: SessionConfig) -> (Session, MemoryServer) {
    let (connector, server) = memory_pair();
    (Session::new(config, connector), server)
}

fn record(id: &str, area: f64, timestamp: i64) -> WireRecord {
    WireRecord {
        country_id: id.into(),
        area,
        timestamp,
    }
}

fn push(records: Vec<WireRecord>) -> ServerEvent {
    ServerEvent::CountryPush(PushBatch { records })
}

fn result(correlation_id: &str, records: Vec<WireRecord>) -> ServerEvent {
    ServerEvent::CountryResult(SearchResult {
        correlation_id: correlation_id.into(),
        records,
    })
}

async fn connect(session: &Session, server: &mut MemoryServer) -> ServerConn {
    let (connected, conn) = tokio::join!(session.connect(), server.accept());
    connected.unwrap();
    conn.unwrap()
}

/// Run the handshake, answering with `accept` on the server side.
async fn authenticate(
    session: &Session,
    conn: &mut ServerConn,
    token: &str,
    accept: bool,
) -> Result<(), SessionError> {
    let (outcome, ()) = tokio::join!(session.authenticate(AuthCredential::new(token)), async {
        let submitted = conn.recv().await.unwrap().unwrap();
        assert_eq!(submitted, ClientEvent::AuthSubmit(Credential::new(token)));
        conn.send(&ServerEvent::AuthResult(AuthResult {
            success: accept,
            reason: (!accept).then(|| "invalid token".to_string()),
        }))
        .unwrap();
    });
    outcome
}

async fn next_search(conn: &mut ServerConn) -> (String, String) {
    match conn.recv().await.unwrap().unwrap() {
        ClientEvent::CountrySearch(request) => (request.correlation_id, request.query_term),
        other => panic!("expected country:search, got {other:?}"),
    }
}

async fn wait_for_generation(session: &Session, generation: u64) -> Arc<AreaSnapshot> {
    let mut stream = session.store().subscribe();
    loop {
        let snap = stream.latest();
        if snap.generation >= generation {
            return snap;
        }
        stream.changed().await.unwrap();
    }
}

async fn wait_for_connection(session: &Session, state: ConnectionState) {
    session
        .connection_state()
        .wait_for(|s| *s == state)
        .await
        .unwrap();
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_search_updates_store() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;

    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();
    assert_eq!(*session.auth_state().borrow(), AuthState::Authenticated);
    assert_eq!(session.status(), SessionStatus::Ready);

    let before = session.snapshot().generation;
    let (records, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(3000), session.search("Brazil")),
        async {
            let (id, term) = next_search(&mut conn).await;
            assert_eq!(term, "Brazil");
            conn.send(&result(&id, vec![record("BR", 8_515_767.0, T)])).unwrap();
        }
    );

    let records = records.unwrap().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].country_id, CountryId::new("BR"));

    let snap = session.snapshot();
    let br = snap.get(&"BR".into()).unwrap();
    assert_eq!(br.area, 8_515_767.0);
    assert_eq!(br.source, UpdateSource::QueryResponse);
    assert_eq!(br.updated_at.timestamp_millis(), T);
    assert_eq!(snap.generation, before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_on_auth_requests_full_push() {
    let mut cfg = config();
    cfg.sync_on_auth = true;
    let (session, mut server) = setup(cfg);
    let mut conn = connect(&session, &mut server).await;
    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();

    assert_eq!(conn.recv().await.unwrap().unwrap(), ClientEvent::CountrySync);
    conn.send(&push(vec![record("BR", 8_515_767.0, T), record("FR", 551_695.0, T)]))
        .unwrap();

    let snap = wait_for_generation(&session, 1).await;
    assert_eq!(snap.len(), 2);
    assert!(snap.iter().all(|r| r.source == UpdateSource::Push));
}

#[tokio::test(start_paused = true)]
async fn test_oneshot() {
    let (connector, mut server) = memory_pair();
    let server_task = tokio::spawn(async move {
        let mut conn = server.accept().await.unwrap();
        let ClientEvent::AuthSubmit(_) = conn.recv().await.unwrap().unwrap() else {
            panic!("expected auth:submit");
        };
        conn.send(&ServerEvent::AuthResult(AuthResult {
            success: true,
            reason: None,
        }))
        .unwrap();
        let (id, _) = next_search(&mut conn).await;
        conn.send(&result(&id, vec![record("CL", 756_102.0, T)])).unwrap();
        // Wait for the client to hang up.
        while conn.recv().await.is_some() {}
        conn.closed_by_client()
    });

    let records = Session::oneshot(
        config(),
        connector,
        AuthCredential::new("valid-token"),
        |session| async move { session.search("Chile").await },
    )
    .await
    .unwrap();

    assert_eq!(records[0].country_id.as_str(), "CL");
    assert!(server_task.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_message_consumers_see_every_event() {
    let (session, mut server) = setup(config());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    session
        .on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    let mut messages = session.subscribe_messages();

    let mut conn = connect(&session, &mut server).await;
    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();
    conn.send(&push(vec![record("BR", 1.0, T)])).unwrap();
    wait_for_generation(&session, 1).await;

    assert_eq!(messages.recv().await.unwrap().name(), "auth:result");
    assert_eq!(messages.recv().await.unwrap().name(), "country:push");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

// ── Authentication gating ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_rejected_credential_blocks_search() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;

    let err = authenticate(&session, &mut conn, "invalid-token", false)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::AuthRejected {
            reason: Some("invalid token".into())
        }
    );
    assert!(matches!(*session.auth_state().borrow(), AuthState::Rejected { .. }));
    assert!(matches!(session.status(), SessionStatus::Rejected { .. }));

    assert_eq!(session.search("Brazil").await.unwrap_err(), SessionError::Unauthorized);
    assert!(conn.try_recv().is_none(), "search must not reach the wire");
}

#[tokio::test(start_paused = true)]
async fn test_data_before_authentication_is_discarded() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;

    conn.send(&push(vec![record("BR", 8_515_767.0, T)])).unwrap();
    conn.send(&result("nobody-asked", vec![record("AR", 2_780_400.0, T)]))
        .unwrap();

    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();
    conn.send(&push(vec![record("FR", 551_695.0, T)])).unwrap();

    // Frames on one transport are handled in order, so the earlier ones
    // have been dropped by the time this generation is visible.
    let snap = wait_for_generation(&session, 1).await;
    assert_eq!(snap.generation, 1);
    assert!(snap.get(&"BR".into()).is_none());
    assert!(snap.get(&"AR".into()).is_none());
    assert!(snap.get(&"FR".into()).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_auth_timeout() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;

    let (outcome, submitted) = tokio::join!(
        session.authenticate(AuthCredential::new("valid-token")),
        conn.recv()
    );
    assert!(submitted.is_some());
    assert_eq!(outcome.unwrap_err(), SessionError::AuthTimeout { timeout_ms: 10_000 });
    assert_eq!(*session.auth_state().borrow(), AuthState::Unauthenticated);

    // A late result no longer counts.
    conn.send(&ServerEvent::AuthResult(AuthResult {
        success: true,
        reason: None,
    }))
    .unwrap();
    conn.send(&push(vec![record("BR", 1.0, T)])).unwrap();
    assert_eq!(session.search("Brazil").await.unwrap_err(), SessionError::Unauthorized);
    assert_eq!(session.snapshot().generation, 0);
}

#[tokio::test(start_paused = true)]
async fn test_authenticate_requires_connection() {
    let (session, _server) = setup(config());
    let err = session
        .authenticate(AuthCredential::new("valid-token"))
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::NotConnected);
}

// ── Queries ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_query_timeout() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;
    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();

    let (outcome, (_, term)) = tokio::join!(session.search("Atlantis"), next_search(&mut conn));
    assert_eq!(term, "Atlantis");
    assert_eq!(outcome.unwrap_err(), SessionError::QueryTimeout { timeout_ms: 3_000 });
    assert_eq!(
        session.status(),
        SessionStatus::QueryTimedOut {
            term: "Atlantis".into()
        }
    );
    assert_eq!(session.query_activity().borrow().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_resolve_independently() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;
    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();

    let (peru, chile, ()) = tokio::join!(session.search("Peru"), session.search("Chile"), async {
        let first = next_search(&mut conn).await;
        let second = next_search(&mut conn).await;
        // Answer in reverse order.
        for (id, term) in [second, first] {
            let country = if term == "Peru" { "PE" } else { "CL" };
            conn.send(&result(&id, vec![record(country, 1.0, T)])).unwrap();
        }
    });

    assert_eq!(peru.unwrap()[0].country_id.as_str(), "PE");
    assert_eq!(chile.unwrap()[0].country_id.as_str(), "CL");
    assert_eq!(session.snapshot().generation, 2);
}

#[tokio::test(start_paused = true)]
async fn test_blank_query_is_rejected_locally() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;
    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();

    let err = session.search("   ").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidQuery { .. }));
    assert!(conn.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_bad_entry_does_not_drop_its_batch() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;
    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();

    let frame = serde_json::json!({
        "event": "country:push",
        "data": {
            "records": [
                { "countryId": "BR", "area": 8_515_767.0, "timestamp": T },
                { "countryId": "FR", "area": null, "timestamp": T },
                { "countryId": "  ", "area": 1.0, "timestamp": T }
            ]
        }
    });
    conn.send_raw(frame.to_string()).unwrap();

    let snap = wait_for_generation(&session, 1).await;
    assert_eq!(snap.len(), 1);
    let brazil = snap.get(&"BR".into()).unwrap();
    assert_eq!(brazil.area, 8_515_767.0);
    assert_eq!(brazil.source, UpdateSource::Push);
    assert!(snap.get(&"FR".into()).is_none());
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_reconnect_increments_attempt_and_resets_auth() {
    let (session, mut server) = setup(config());
    let mut conn1 = connect(&session, &mut server).await;
    assert_eq!(conn1.attempt(), 1);
    authenticate(&session, &mut conn1, "valid-token", true).await.unwrap();

    conn1.drop_connection("network reset");
    wait_for_connection(&session, ConnectionState::Connecting).await;
    assert_eq!(*session.auth_state().borrow(), AuthState::Unauthenticated);

    let mut conn2 = server.accept().await.unwrap();
    assert_eq!(conn2.attempt(), 2);
    wait_for_connection(&session, ConnectionState::Reauthenticating).await;
    assert_eq!(session.status(), SessionStatus::ConnectionLost);
    assert_eq!(session.search("Brazil").await.unwrap_err(), SessionError::Unauthorized);

    authenticate(&session, &mut conn2, "valid-token", true).await.unwrap();
    assert_eq!(*session.connection_state().borrow(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_stale_flag_tracks_connection_loss() {
    let (session, mut server) = setup(config());
    let mut conn1 = connect(&session, &mut server).await;
    authenticate(&session, &mut conn1, "valid-token", true).await.unwrap();
    conn1.send(&push(vec![record("BR", 8_515_767.0, T)])).unwrap();
    assert!(!wait_for_generation(&session, 1).await.stale);

    conn1.drop_connection("network reset");
    wait_for_connection(&session, ConnectionState::Connecting).await;
    let snap = session.snapshot();
    assert!(snap.stale);
    assert_eq!(snap.generation, 1);
    assert_eq!(snap.len(), 1, "data is retained while stale");

    let mut conn2 = server.accept().await.unwrap();
    authenticate(&session, &mut conn2, "valid-token", true).await.unwrap();
    assert!(session.snapshot().stale);

    conn2.send(&push(vec![record("AR", 2_780_400.0, T)])).unwrap();
    let snap = wait_for_generation(&session, 2).await;
    assert!(!snap.stale);
    assert_eq!(snap.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_close_is_not_a_loss() {
    let (session, mut server) = setup(config());
    let mut conn1 = connect(&session, &mut server).await;
    authenticate(&session, &mut conn1, "valid-token", true).await.unwrap();
    session.close().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Offline);

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let pending = server.next_attempt().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Connecting);

    let _conn2 = pending.accept();
    connecting.await.unwrap().unwrap();
    assert_eq!(*session.connection_state().borrow(), ConnectionState::Open);
    assert_eq!(session.status(), SessionStatus::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn test_refused_first_attempt_is_not_a_loss() {
    let (session, mut server) = setup(config());
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });

    server.next_attempt().await.unwrap().refuse("warming up");
    // The retry only arrives once the loss has been handled.
    let retry = server.next_attempt().await.unwrap();
    assert_eq!(retry.attempt(), 2);
    assert_eq!(*session.connection_state().borrow(), ConnectionState::Connecting);
    assert_eq!(session.status(), SessionStatus::Connecting);

    let _conn = retry.accept();
    connecting.await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn test_response_from_previous_attempt_is_discarded() {
    let (session, mut server) = setup(config());
    let mut conn1 = connect(&session, &mut server).await;
    authenticate(&session, &mut conn1, "valid-token", true).await.unwrap();

    let search = tokio::spawn({
        let session = session.clone();
        async move { session.search("France").await }
    });
    let (correlation_id, term) = next_search(&mut conn1).await;
    assert_eq!(term, "France");

    conn1.drop_connection("network reset");
    let mut conn2 = server.accept().await.unwrap();
    authenticate(&session, &mut conn2, "valid-token", true).await.unwrap();
    let before = session.snapshot();

    let france = vec![record("FR", 551_695.0, T)];
    // Late frame from the dead transport, then the same answer replayed on
    // the new one: both belong to session attempt 1.
    conn1.send(&result(&correlation_id, france.clone())).unwrap();
    conn2.send(&result(&correlation_id, france)).unwrap();
    conn2.send(&push(vec![record("DE", 357_588.0, T)])).unwrap();

    let snap = wait_for_generation(&session, before.generation + 1).await;
    assert_eq!(snap.generation, before.generation + 1);
    assert!(snap.get(&"FR".into()).is_none());
    assert!(snap.get(&"DE".into()).is_some());

    assert_eq!(
        search.await.unwrap().unwrap_err(),
        SessionError::QueryTimeout { timeout_ms: 3_000 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_is_terminal() {
    let mut cfg = config();
    cfg.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        max_retries: Some(2),
    };
    let (session, mut server) = setup(cfg);
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    tokio::spawn(async move {
        while let Some(pending) = server.next_attempt().await {
            counter.fetch_add(1, Ordering::SeqCst);
            pending.refuse("unreachable");
        }
    });

    let err = session.connect().await.unwrap_err();
    assert_eq!(err, SessionError::TransportFailed { attempts: 3 });
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(*session.connection_state().borrow(), ConnectionState::Failed);
    assert_eq!(session.status(), SessionStatus::Failed);

    assert_eq!(
        session.search("Brazil").await.unwrap_err(),
        SessionError::TransportFailed { attempts: 3 }
    );
    assert!(
        session
            .authenticate(AuthCredential::new("valid-token"))
            .await
            .unwrap_err()
            .is_terminal()
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_pending_search() {
    let (session, mut server) = setup(config());
    let mut conn = connect(&session, &mut server).await;
    authenticate(&session, &mut conn, "valid-token", true).await.unwrap();

    let search = tokio::spawn({
        let session = session.clone();
        async move { session.search("Brazil").await }
    });
    next_search(&mut conn).await;

    session.close().await.unwrap();
    assert_eq!(search.await.unwrap().unwrap_err(), SessionError::NotConnected);
    assert_eq!(*session.connection_state().borrow(), ConnectionState::Closed);
    assert_eq!(session.status(), SessionStatus::Offline);
    assert!(conn.closed_by_client());
    assert!(session.snapshot().stale);
}
