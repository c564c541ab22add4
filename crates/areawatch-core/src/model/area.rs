// ── Country-area records ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── CountryId ───────────────────────────────────────────────────────

/// Unique key of a country in the area state (e.g. `"BR"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryId(String);

impl CountryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CountryId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CountryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── UpdateSource ────────────────────────────────────────────────────

/// Which inbound path last wrote a record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum UpdateSource {
    /// Unsolicited `country:push`.
    Push,
    /// `country:result` answering one of our searches.
    QueryResponse,
}

// ── AreaUpdate / AreaRecord ─────────────────────────────────────────

/// One normalized entry of an inbound batch, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaUpdate {
    pub country_id: CountryId,
    pub area: f64,
    pub updated_at: DateTime<Utc>,
}

/// Current value for one country in the area state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaRecord {
    pub country_id: CountryId,
    pub area: f64,
    pub source: UpdateSource,
    pub updated_at: DateTime<Utc>,
}

impl AreaRecord {
    pub fn from_update(update: AreaUpdate, source: UpdateSource) -> Self {
        Self {
            country_id: update.country_id,
            area: update.area,
            source,
            updated_at: update.updated_at,
        }
    }

    /// Last-write-wins: an update replaces this record unless it is older.
    /// Equal timestamps go to the later arrival.
    pub fn is_superseded_by(&self, update: &AreaUpdate) -> bool {
        update.updated_at >= self.updated_at
    }
}
