//! State store: subscriber binding plus per-day acknowledgment flags.
//!
//! The store keeps the authoritative copy in memory and writes the full
//! snapshot through a [`SnapshotBackend`] after every mutation. History is
//! capped to the most recent [`HISTORY_DAYS`] dates on each write.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::access::Identity;
use crate::error::{FailOpen, Result};
use crate::schedule::Schedule;

/// Number of calendar dates kept in the persisted history.
pub const HISTORY_DAYS: usize = 14;

/// Slot label -> acknowledged.
pub type DayRecord = BTreeMap<String, bool>;

/// Date-ordered day records.
pub type History = BTreeMap<NaiveDate, DayRecord>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "subscriber_id", default)]
    pub subscriber: Option<Identity>,
    #[serde(default)]
    pub history: History,
}

impl Snapshot {
    /// Drop everything but the `keep` most recent dates.
    pub fn truncate_history(&mut self, keep: usize) {
        while self.history.len() > keep {
            self.history.pop_first();
        }
    }
}

/// Durable home for a [`Snapshot`].
pub trait SnapshotBackend: Send + Sync {
    /// `Ok(None)` when nothing was ever written; `Err` on unreadable or corrupt data.
    fn read(&self) -> Result<Option<Snapshot>>;

    /// Replace the stored snapshot. Readers never observe a partial write.
    fn write(&self, snapshot: &Snapshot) -> Result<()>;
}

impl<T: SnapshotBackend + ?Sized> SnapshotBackend for Arc<T> {
    fn read(&self) -> Result<Option<Snapshot>> {
        (**self).read()
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        (**self).write(snapshot)
    }
}

/// Last persisted snapshot, or an empty one. Corruption is logged and treated
/// as "nothing stored".
pub fn load<B: SnapshotBackend + ?Sized>(backend: &B) -> Snapshot {
    backend
        .read()
        .fail_open_default("load state snapshot")
        .unwrap_or_default()
}

/// Truncate to [`HISTORY_DAYS`] and write.
pub fn save<B: SnapshotBackend + ?Sized>(backend: &B, snapshot: &mut Snapshot) -> Result<()> {
    snapshot.truncate_history(HISTORY_DAYS);
    backend.write(snapshot)
}

pub struct StateStore<B: SnapshotBackend> {
    backend: B,
    labels: Vec<String>,
    snapshot: Snapshot,
}

impl<B: SnapshotBackend> StateStore<B> {
    pub fn open(backend: B, schedule: &Schedule) -> Self {
        let snapshot = load(&backend);
        tracing::debug!(
            days = snapshot.history.len(),
            subscriber = ?snapshot.subscriber,
            "state store opened"
        );
        Self {
            backend,
            labels: schedule.labels().map(str::to_string).collect(),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &History {
        &self.snapshot.history
    }

    pub fn subscriber(&self) -> Option<Identity> {
        self.snapshot.subscriber
    }

    pub fn bind_subscriber(&mut self, who: Identity) -> Result<()> {
        self.snapshot.subscriber = Some(who);
        self.persist()
    }

    /// Create the day record with every slot unacknowledged. No-op if present.
    pub fn ensure_day(&mut self, date: NaiveDate) -> Result<()> {
        if self.snapshot.history.contains_key(&date) {
            return Ok(());
        }
        self.snapshot.history.insert(date, self.blank_day());
        self.persist()
    }

    /// Mark `label` taken on `date`. Returns true only on a false -> true
    /// transition; unknown labels are ignored.
    pub fn set_acknowledged(&mut self, date: NaiveDate, label: &str) -> Result<bool> {
        if !self.labels.iter().any(|l| l == label) {
            tracing::debug!(label, "acknowledgment for unknown dose slot ignored");
            return Ok(false);
        }

        let blank = self.blank_day();
        let day = self.snapshot.history.entry(date).or_insert(blank);
        let flag = day.entry(label.to_string()).or_insert(false);
        if *flag {
            return Ok(false);
        }
        *flag = true;

        self.persist()?;
        Ok(true)
    }

    pub fn is_acknowledged(&self, date: NaiveDate, label: &str) -> bool {
        self.snapshot
            .history
            .get(&date)
            .and_then(|day| day.get(label))
            .copied()
            .unwrap_or(false)
    }

    fn blank_day(&self) -> DayRecord {
        self.labels.iter().map(|l| (l.clone(), false)).collect()
    }

    fn persist(&mut self) -> Result<()> {
        save(&self.backend, &mut self.snapshot).inspect_err(|e| {
            tracing::error!(error = %e, "failed to persist state; latest change lives only in memory");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::schedule::DoseSlot;
    use chrono::NaiveTime;

    fn schedule() -> Schedule {
        let t = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        Schedule::new(vec![
            DoseSlot::new("morning", t),
            DoseSlot::new("noon", t),
            DoseSlot::new("night", t),
        ])
        .unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, n).unwrap()
    }

    #[test]
    fn empty_backend_loads_empty_snapshot() {
        let store = StateStore::open(MemoryBackend::new(), &schedule());
        assert_eq!(store.subscriber(), None);
        assert!(store.history().is_empty());
    }

    #[test]
    fn corrupt_backend_loads_empty_snapshot() {
        let backend = MemoryBackend::with_raw("{ definitely not json");
        let store = StateStore::open(backend, &schedule());
        assert_eq!(store.snapshot(), &Snapshot::default());
    }

    #[test]
    fn ensure_day_initializes_all_slots_false() {
        let backend = Arc::new(MemoryBackend::new());
        let mut store = StateStore::open(backend.clone(), &schedule());
        store.ensure_day(day(1)).unwrap();

        let rec = &store.history()[&day(1)];
        assert_eq!(rec.len(), 3);
        assert!(rec.values().all(|v| !v));

        // Persisted too.
        let persisted = backend.read().unwrap().unwrap();
        assert_eq!(persisted.history[&day(1)].len(), 3);
    }

    #[test]
    fn ensure_day_is_noop_when_present() {
        let mut store = StateStore::open(MemoryBackend::new(), &schedule());
        store.set_acknowledged(day(1), "noon").unwrap();
        store.ensure_day(day(1)).unwrap();
        assert!(store.is_acknowledged(day(1), "noon"));
    }

    #[test]
    fn set_acknowledged_is_idempotent() {
        let mut store = StateStore::open(MemoryBackend::new(), &schedule());
        assert!(store.set_acknowledged(day(1), "morning").unwrap());
        let after_first = store.snapshot().clone();

        assert!(!store.set_acknowledged(day(1), "morning").unwrap());
        assert_eq!(store.snapshot(), &after_first);
    }

    #[test]
    fn set_acknowledged_creates_full_day_record() {
        let mut store = StateStore::open(MemoryBackend::new(), &schedule());
        store.set_acknowledged(day(2), "night").unwrap();

        let rec = &store.history()[&day(2)];
        assert_eq!(rec.get("morning"), Some(&false));
        assert_eq!(rec.get("noon"), Some(&false));
        assert_eq!(rec.get("night"), Some(&true));
    }

    #[test]
    fn unknown_label_changes_nothing() {
        let mut store = StateStore::open(MemoryBackend::new(), &schedule());
        assert!(!store.set_acknowledged(day(1), "brunch").unwrap());
        assert!(store.history().is_empty());
    }

    #[test]
    fn save_keeps_fourteen_most_recent_dates() {
        let backend = Arc::new(MemoryBackend::new());
        let mut store = StateStore::open(backend.clone(), &schedule());
        for n in 1..=20 {
            store.ensure_day(day(n)).unwrap();
        }

        let persisted = backend.read().unwrap().unwrap();
        assert_eq!(persisted.history.len(), HISTORY_DAYS);
        let dates: Vec<_> = persisted.history.keys().copied().collect();
        assert_eq!(dates.first(), Some(&day(7)));
        assert_eq!(dates.last(), Some(&day(20)));
        assert_eq!(store.history().len(), HISTORY_DAYS);
    }

    #[test]
    fn truncation_keeps_recent_dates_even_with_gaps() {
        let mut snap = Snapshot::default();
        for n in (1..=31).step_by(2) {
            snap.history.insert(day(n), DayRecord::new());
        }
        assert_eq!(snap.history.len(), 16);
        snap.truncate_history(HISTORY_DAYS);
        assert_eq!(snap.history.keys().next(), Some(&day(5)));
        assert_eq!(snap.history.keys().last(), Some(&day(31)));
    }

    #[test]
    fn write_failure_is_reported_but_memory_keeps_flag() {
        let backend = Arc::new(MemoryBackend::new());
        let mut store = StateStore::open(backend.clone(), &schedule());
        backend.fail_writes(true);

        assert!(store.set_acknowledged(day(1), "morning").is_err());
        assert!(store.is_acknowledged(day(1), "morning"));
        assert!(backend.read().unwrap().is_none());

        backend.fail_writes(false);
        store.bind_subscriber(Identity(7)).unwrap();
        let persisted = backend.read().unwrap().unwrap();
        assert_eq!(persisted.history[&day(1)]["morning"], true);
        assert_eq!(persisted.subscriber, Some(Identity(7)));
    }

    #[test]
    fn snapshot_json_layout() {
        let mut snap = Snapshot {
            subscriber: Some(Identity(5)),
            history: History::new(),
        };
        snap.history
            .insert(day(1), [("morning".to_string(), true)].into_iter().collect());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["subscriber_id"], 5);
        assert_eq!(json["history"]["2024-01-01"]["morning"], true);
    }
}
