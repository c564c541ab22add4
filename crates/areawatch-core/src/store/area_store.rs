// ── Area state store ──
//
// Owns the country → area mapping. The session loop is the only writer;
// everyone else reads immutable snapshots through `AreaReader`. Each
// mutation builds a new snapshot and publishes it through a `watch`
// channel, then calls the synchronous observers with the same snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::model::{AreaRecord, AreaUpdate, CountryId, UpdateSource};
use crate::stream::{AreaFilter, AreaStream};

type Observer = Arc<dyn Fn(&Arc<AreaSnapshot>) + Send + Sync>;

// ── AreaSnapshot ─────────────────────────────────────────────────────

/// Immutable point-in-time view of the area state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AreaSnapshot {
    pub records: BTreeMap<CountryId, AreaRecord>,
    /// Bumped once per `apply_update` call.
    pub generation: u64,
    /// The connection is not open, so the data may be outdated.
    pub stale: bool,
}

impl AreaSnapshot {
    pub fn get(&self, id: &CountryId) -> Option<&AreaRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in country-id order.
    pub fn iter(&self) -> impl Iterator<Item = &AreaRecord> {
        self.records.values()
    }

    pub fn filtered<'a>(&'a self, filter: &'a AreaFilter) -> impl Iterator<Item = &'a AreaRecord> {
        self.records.values().filter(move |r| filter.matches(r))
    }
}

/// What one `apply_update` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Generation after the call.
    pub generation: u64,
    /// Countries whose record was written.
    pub written: Vec<CountryId>,
    /// Entries skipped because a newer record was already held.
    pub superseded: usize,
}

/// Handle returned by `observe`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

// ── AreaStore ────────────────────────────────────────────────────────

pub struct AreaStore {
    state: watch::Sender<Arc<AreaSnapshot>>,
    observers: Mutex<ObserverList>,
}

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<(ObserverId, Observer)>,
}

impl AreaStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(AreaSnapshot::default()));
        Self {
            state,
            observers: Mutex::new(ObserverList::default()),
        }
    }

    /// Merge a batch with last-write-wins.
    ///
    /// The generation is bumped exactly once even if nothing was written,
    /// `stale` is cleared, and observers see the fully merged snapshot.
    pub fn apply_update(&self, updates: Vec<AreaUpdate>, source: UpdateSource) -> ApplyOutcome {
        let mut next = AreaSnapshot::clone(&self.state.borrow());
        let mut written = Vec::with_capacity(updates.len());
        let mut superseded = 0;

        for update in updates {
            match next.records.get(&update.country_id) {
                Some(existing) if !existing.is_superseded_by(&update) => superseded += 1,
                _ => {
                    written.push(update.country_id.clone());
                    next.records.insert(
                        update.country_id.clone(),
                        AreaRecord::from_update(update, source),
                    );
                }
            }
        }
        next.generation += 1;
        next.stale = false;

        tracing::debug!(
            %source,
            generation = next.generation,
            written = written.len(),
            superseded,
            "area state updated"
        );

        let outcome = ApplyOutcome {
            generation: next.generation,
            written,
            superseded,
        };
        self.publish(next);
        outcome
    }

    /// Flag the current data as possibly outdated. Data is retained and the
    /// generation is left alone. No-op if already stale.
    pub fn mark_stale(&self) {
        if self.state.borrow().stale {
            return;
        }
        let mut next = AreaSnapshot::clone(&self.state.borrow());
        next.stale = true;
        tracing::debug!(generation = next.generation, "area state marked stale");
        self.publish(next);
    }

    pub fn snapshot(&self) -> Arc<AreaSnapshot> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> AreaStream {
        AreaStream::new(self.state.subscribe())
    }

    /// Register a synchronous observer, called after every mutation.
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Arc<AreaSnapshot>) + Send + Sync + 'static,
    {
        let mut list = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ObserverId(list.next_id);
        list.next_id += 1;
        list.entries.push((id, Arc::new(observer)));
        id
    }

    /// Returns `false` if the observer was not registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut list = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = list.entries.len();
        list.entries.retain(|(entry, _)| *entry != id);
        list.entries.len() != before
    }

    fn publish(&self, next: AreaSnapshot) {
        let next = Arc::new(next);
        self.state.send_replace(Arc::clone(&next));

        // Called outside the lock so an observer may register or unregister.
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            observer(&next);
        }
    }
}

impl Default for AreaStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── AreaReader ───────────────────────────────────────────────────────

/// Read-only handle handed to UI surfaces. Cheaply cloneable.
#[derive(Clone)]
pub struct AreaReader {
    store: Arc<AreaStore>,
}

impl AreaReader {
    pub(crate) fn new(store: Arc<AreaStore>) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> Arc<AreaSnapshot> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> AreaStream {
        self.store.subscribe()
    }

    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Arc<AreaSnapshot>) + Send + Sync + 'static,
    {
        self.store.observe(observer)
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.store.unobserve(id)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn update(id: &str, area: f64, ms: i64) -> AreaUpdate {
        AreaUpdate {
            country_id: id.into(),
            area,
            updated_at: at(ms),
        }
    }

    fn area_of(store: &AreaStore, id: &str) -> Option<f64> {
        store.snapshot().get(&id.into()).map(|r| r.area)
    }

    #[test]
    fn newer_timestamp_wins() {
        let store = AreaStore::new();
        store.apply_update(vec![update("BR", 1.0, 100)], UpdateSource::Push);
        store.apply_update(vec![update("BR", 2.0, 200)], UpdateSource::QueryResponse);

        let snap = store.snapshot();
        let br = snap.get(&"BR".into()).unwrap();
        assert_eq!(br.area, 2.0);
        assert_eq!(br.source, UpdateSource::QueryResponse);
    }

    #[test]
    fn older_timestamp_is_ignored() {
        let store = AreaStore::new();
        store.apply_update(vec![update("BR", 2.0, 200)], UpdateSource::Push);
        let outcome = store.apply_update(vec![update("BR", 1.0, 100)], UpdateSource::Push);

        assert_eq!(area_of(&store, "BR"), Some(2.0));
        assert_eq!(outcome.superseded, 1);
        assert!(outcome.written.is_empty());
    }

    #[test]
    fn equal_timestamp_goes_to_later_arrival() {
        let store = AreaStore::new();
        store.apply_update(vec![update("FR", 1.0, 100)], UpdateSource::Push);
        store.apply_update(vec![update("FR", 3.0, 100)], UpdateSource::Push);
        assert_eq!(area_of(&store, "FR"), Some(3.0));

        // Within one batch as well.
        store.apply_update(
            vec![update("DE", 1.0, 50), update("DE", 4.0, 50)],
            UpdateSource::Push,
        );
        assert_eq!(area_of(&store, "DE"), Some(4.0));
    }

    #[test]
    fn lww_is_order_independent_for_distinct_timestamps() {
        let updates = [update("ES", 1.0, 10), update("ES", 3.0, 30), update("ES", 2.0, 20)];

        for order in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
            let store = AreaStore::new();
            for i in order {
                store.apply_update(vec![updates[i].clone()], UpdateSource::Push);
            }
            assert_eq!(area_of(&store, "ES"), Some(3.0), "order {order:?}");
        }
    }

    #[test]
    fn generation_bumps_once_per_call() {
        let store = AreaStore::new();
        let outcome = store.apply_update(
            vec![update("A", 1.0, 1), update("B", 1.0, 1), update("C", 1.0, 1)],
            UpdateSource::Push,
        );
        assert_eq!(outcome.generation, 1);

        store.apply_update(Vec::new(), UpdateSource::Push);
        assert_eq!(store.snapshot().generation, 2);
    }

    #[test]
    fn stale_is_cleared_by_update_and_keeps_data() {
        let store = AreaStore::new();
        store.apply_update(vec![update("BR", 1.0, 1)], UpdateSource::Push);

        store.mark_stale();
        let snap = store.snapshot();
        assert!(snap.stale);
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.len(), 1);

        store.apply_update(Vec::new(), UpdateSource::Push);
        assert!(!store.snapshot().stale);
    }

    #[test]
    fn observers_see_merged_snapshot() {
        let store = AreaStore::new();
        let seen = Arc::new(AtomicU64::new(0));

        let seen_cb = Arc::clone(&seen);
        let id = store.observe(move |snap| {
            assert!(snap.get(&"BR".into()).is_some());
            assert!(snap.get(&"AR".into()).is_some());
            seen_cb.store(snap.generation, Ordering::SeqCst);
        });

        store.apply_update(
            vec![update("BR", 1.0, 1), update("AR", 2.0, 1)],
            UpdateSource::Push,
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(store.unobserve(id));
        assert!(!store.unobserve(id));
    }

    #[test]
    fn old_snapshots_are_immutable() {
        let store = AreaStore::new();
        store.apply_update(vec![update("BR", 1.0, 1)], UpdateSource::Push);
        let before = store.snapshot();

        store.apply_update(vec![update("BR", 9.0, 2)], UpdateSource::Push);
        assert_eq!(before.get(&"BR".into()).unwrap().area, 1.0);
        assert_eq!(before.generation, 1);
    }

    #[tokio::test]
    async fn stream_receives_changes() {
        let store = AreaStore::new();
        let mut stream = store.subscribe();
        assert_eq!(stream.current().generation, 0);

        store.apply_update(vec![update("BR", 1.0, 1)], UpdateSource::Push);
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.generation, 1);
    }
}
