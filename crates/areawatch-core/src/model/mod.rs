// ── Domain model ──
//
// Canonical representation of country-area data as consumers see it.
// Wire records are normalized into these types by `crate::convert`.

pub mod area;

pub use area::{AreaRecord, AreaUpdate, CountryId, UpdateSource};
