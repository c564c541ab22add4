// ── Filter predicates for area snapshots ──
//
// Used by the table views to narrow a snapshot without re-querying.

use crate::model::{AreaRecord, CountryId, UpdateSource};

/// Filter predicate for area records.
pub enum AreaFilter {
    All,
    Country(CountryId),
    /// Any of the listed countries.
    Countries(Vec<CountryId>),
    MinArea(f64),
    Source(UpdateSource),
    Custom(Box<dyn Fn(&AreaRecord) -> bool + Send + Sync>),
}

impl AreaFilter {
    pub fn matches(&self, record: &AreaRecord) -> bool {
        match self {
            Self::All => true,
            Self::Country(id) => record.country_id == *id,
            Self::Countries(ids) => ids.contains(&record.country_id),
            Self::MinArea(min) => record.area >= *min,
            Self::Source(source) => record.source == *source,
            Self::Custom(f) => f(record),
        }
    }
}
