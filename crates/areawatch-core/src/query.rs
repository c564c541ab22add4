// ── Country query channel ──
//
// Correlated `country:search` requests over the authenticated connection.
// Each request carries a fresh correlation id and is tagged with the
// session attempt it was issued under; a response only resolves its entry
// if both match. Unanswered entries are removed by their timeout.

use std::collections::HashMap;
use std::fmt;

use areawatch_api::ClientEvent;
use areawatch_api::protocol::SearchRequest;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthState;
use crate::error::SessionError;
use crate::model::AreaRecord;

/// Reply channel of one `search` call.
pub type SearchReply = oneshot::Sender<Result<Vec<AreaRecord>, SessionError>>;

// ── QueryTerm ────────────────────────────────────────────────────

/// A normalized, non-empty search term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryTerm(String);

impl QueryTerm {
    /// Trim and collapse inner whitespace. Blank input is rejected.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Err(SessionError::InvalidQuery {
                reason: "search term is empty".into(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── CorrelationId ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── Pending requests ─────────────────────────────────────────────

/// An outstanding search.
pub struct PendingQuery {
    pub term: QueryTerm,
    /// Session attempt the request was written under.
    pub attempt: u64,
    pub reply: SearchReply,
}

/// Outcome of matching an inbound `country:result`.
pub enum Resolution {
    Matched(PendingQuery),
    /// No outstanding request with that correlation id.
    Unknown,
    /// Outstanding, but issued under another session attempt. The entry is
    /// kept and will time out.
    StaleAttempt { issued: u64 },
}

/// Prepared request, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub id: CorrelationId,
    pub term: QueryTerm,
    pub event: ClientEvent,
}

#[derive(Default)]
pub struct QueryChannel {
    pending: HashMap<CorrelationId, PendingQuery>,
}

impl QueryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the wire request for `raw_term`.
    ///
    /// Fails with `Unauthorized` unless the session is authenticated and
    /// with `InvalidQuery` for a blank term; nothing is sent in either case.
    pub fn prepare(auth: &AuthState, raw_term: &str) -> Result<PreparedQuery, SessionError> {
        if !auth.is_authenticated() {
            return Err(SessionError::Unauthorized);
        }
        let term = QueryTerm::parse(raw_term)?;
        let id = CorrelationId::generate();
        let event = ClientEvent::CountrySearch(SearchRequest {
            correlation_id: id.to_string(),
            query_term: term.to_string(),
        });
        Ok(PreparedQuery { id, term, event })
    }

    /// Record a request that has been written under `attempt`.
    pub fn track(&mut self, id: CorrelationId, term: QueryTerm, attempt: u64, reply: SearchReply) {
        debug!(correlation_id = %id, %term, attempt, "query in flight");
        self.pending.insert(
            id,
            PendingQuery {
                term,
                attempt,
                reply,
            },
        );
    }

    /// Match a response received on session attempt `current_attempt`.
    pub fn resolve(&mut self, correlation_id: &str, current_attempt: u64) -> Resolution {
        let key = CorrelationId::from(correlation_id);
        match self.pending.get(&key) {
            None => Resolution::Unknown,
            Some(entry) if entry.attempt != current_attempt => Resolution::StaleAttempt {
                issued: entry.attempt,
            },
            Some(_) => match self.pending.remove(&key) {
                Some(entry) => Resolution::Matched(entry),
                None => Resolution::Unknown,
            },
        }
    }

    /// Remove a request whose timeout fired. `None` if it was already answered.
    pub fn expire(&mut self, id: &CorrelationId) -> Option<PendingQuery> {
        self.pending.remove(id)
    }

    /// Fail every outstanding request.
    pub fn fail_all(&mut self, error: &SessionError) {
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(error.clone()));
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
