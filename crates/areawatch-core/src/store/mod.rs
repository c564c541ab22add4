// ── Area state store ──
//
// The single shared "area" value, with push-based change notification.

mod area_store;

pub use area_store::{AreaReader, AreaSnapshot, AreaStore, ApplyOutcome, ObserverId};
