// ── Wire-to-domain conversions ──
//
// Bridges raw `areawatch_api` records into `crate::model` types. Entries the
// store cannot hold (blank id, unusable area or timestamp) are dropped with a
// debug log instead of failing the whole batch.

use chrono::DateTime;

use areawatch_api::WireRecord;

use crate::model::{AreaUpdate, CountryId};

/// Normalize one wire record. `None` means the entry is unusable.
pub fn normalize_record(raw: &WireRecord) -> Option<AreaUpdate> {
    let id = raw.country_id.trim();
    if id.is_empty() {
        tracing::debug!("dropping record with empty country id");
        return None;
    }
    if !raw.area.is_finite() || raw.area < 0.0 {
        tracing::debug!(country = id, area = raw.area, "dropping record with invalid area");
        return None;
    }
    let Some(updated_at) = DateTime::from_timestamp_millis(raw.timestamp) else {
        tracing::debug!(country = id, timestamp = raw.timestamp, "dropping record with out-of-range timestamp");
        return None;
    };

    Some(AreaUpdate {
        country_id: CountryId::new(id),
        area: raw.area,
        updated_at,
    })
}

/// Normalize a whole batch, keeping wire order.
pub fn normalize_batch(records: &[WireRecord]) -> Vec<AreaUpdate> {
    records.iter().filter_map(normalize_record).collect()
}
