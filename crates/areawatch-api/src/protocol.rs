//! Wire protocol spoken over a transport link.
//!
//! Every frame is a JSON text message shaped `{ "event": <name>, "data": <payload> }`.
//! Outbound frames are [`ClientEvent`]s, inbound frames are [`ServerEvent`]s.
//! Transport-level connect/disconnect are not application events.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

// ── Event names ─────────────────────────────────────────────────────

pub const AUTH_SUBMIT: &str = "auth:submit";
pub const AUTH_RESULT: &str = "auth:result";
pub const COUNTRY_SEARCH: &str = "country:search";
pub const COUNTRY_RESULT: &str = "country:result";
pub const COUNTRY_PUSH: &str = "country:push";
pub const COUNTRY_SYNC: &str = "country:sync";

const SERVER_EVENTS: [&str; 3] = [AUTH_RESULT, COUNTRY_RESULT, COUNTRY_PUSH];

// ── Payloads ────────────────────────────────────────────────────────

/// Opaque credential carried by `auth:submit`.
///
/// Serialized as a bare string. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw credential. Only the server side of a test transport needs this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Payload of `country:search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub correlation_id: String,
    pub query_term: String,
}

/// Payload of `auth:result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One country-area entry as the server sends it.
///
/// `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub country_id: String,
    pub area: f64,
    pub timestamp: i64,
}

/// Payload of `country:result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub correlation_id: String,
    #[serde(default, deserialize_with = "records_lenient")]
    pub records: Vec<WireRecord>,
}

/// Payload of `country:push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushBatch {
    #[serde(default, deserialize_with = "records_lenient")]
    pub records: Vec<WireRecord>,
}

/// Decode each entry on its own. An entry that does not fit [`WireRecord`]
/// is dropped, the rest of the batch survives.
fn records_lenient<'de, D>(deserializer: D) -> Result<Vec<WireRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match WireRecord::deserialize(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable record");
                None
            }
        })
        .collect())
}

// ── ClientEvent ─────────────────────────────────────────────────────

/// Events the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "auth:submit")]
    AuthSubmit(Credential),

    #[serde(rename = "country:search")]
    CountrySearch(SearchRequest),

    /// Ask the server for a full `country:push` of its dataset.
    #[serde(rename = "country:sync")]
    CountrySync,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthSubmit(_) => AUTH_SUBMIT,
            Self::CountrySearch(_) => COUNTRY_SEARCH,
            Self::CountrySync => COUNTRY_SYNC,
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })
    }
}

// ── ServerEvent ─────────────────────────────────────────────────────

/// Events the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "auth:result")]
    AuthResult(AuthResult),

    #[serde(rename = "country:result")]
    CountryResult(SearchResult),

    /// Unsolicited server-initiated update.
    #[serde(rename = "country:push")]
    CountryPush(PushBatch),
}

/// Just enough of an envelope to name the event when full decoding fails.
#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthResult(_) => AUTH_RESULT,
            Self::CountryResult(_) => COUNTRY_RESULT,
            Self::CountryPush(_) => COUNTRY_PUSH,
        }
    }

    /// Whether this event carries country data (and so requires an
    /// authenticated session to be trusted).
    pub fn is_data(&self) -> bool {
        matches!(self, Self::CountryResult(_) | Self::CountryPush(_))
    }

    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one inbound text frame.
    ///
    /// Distinguishes frames naming an unknown event from malformed ones.
    pub fn decode(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| match serde_json::from_str::<RawEnvelope>(text) {
            Ok(raw) if !SERVER_EVENTS.contains(&raw.event.as_str()) => {
                Error::UnknownEvent(raw.event)
            }
            _ => Error::Deserialization {
                message: e.to_string(),
                body: text.to_owned(),
            },
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
