//! Trigger scheduler: recurring daily triggers and one-shot delayed triggers.
//!
//! A scheduler never runs business logic. When an entry comes due it pushes
//! the entry's payload into the channel it was built with; whoever drains
//! that channel decides what the payload means.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Weekday};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::time::{Clock, next_occurrence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerHandle(u64);

pub trait TriggerScheduler<P>: Send + Sync {
    /// Fire `payload` every matching day at `time_of_day` (all days when
    /// `days` is empty) until cancelled.
    fn schedule_daily(&self, time_of_day: NaiveTime, days: &[Weekday], payload: P) -> TriggerHandle;

    /// Fire `payload` once, `delay` from now.
    fn schedule_once(&self, delay: Duration, payload: P) -> TriggerHandle;

    /// Drop an entry. No-op if it already fired or was cancelled.
    fn cancel(&self, handle: TriggerHandle);
}

impl<P, T: TriggerScheduler<P> + ?Sized> TriggerScheduler<P> for Arc<T> {
    fn schedule_daily(&self, time_of_day: NaiveTime, days: &[Weekday], payload: P) -> TriggerHandle {
        (**self).schedule_daily(time_of_day, days, payload)
    }

    fn schedule_once(&self, delay: Duration, payload: P) -> TriggerHandle {
        (**self).schedule_once(delay, payload)
    }

    fn cancel(&self, handle: TriggerHandle) {
        (**self).cancel(handle)
    }
}

type TaskMap = Arc<Mutex<HashMap<TriggerHandle, JoinHandle<()>>>>;

/// Timer-per-entry scheduler on top of the tokio runtime.
///
/// Must be used from within a runtime. Wall-clock times are interpreted in
/// the configured fixed offset.
pub struct TokioScheduler<P> {
    tx: mpsc::UnboundedSender<P>,
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    tasks: TaskMap,
}

impl<P: Clone + Send + 'static> TokioScheduler<P> {
    pub fn new(tx: mpsc::UnboundedSender<P>, offset: FixedOffset, clock: Arc<dyn Clock>) -> Self {
        Self {
            tx,
            offset,
            clock,
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Entries that have not fired (one-shots) or not been cancelled (daily).
    pub fn active(&self) -> usize {
        lock(&self.tasks).len()
    }

    fn next_handle(&self) -> TriggerHandle {
        TriggerHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl<P: Clone + Send + 'static> TriggerScheduler<P> for TokioScheduler<P> {
    fn schedule_daily(&self, time_of_day: NaiveTime, days: &[Weekday], payload: P) -> TriggerHandle {
        let handle = self.next_handle();
        let tx = self.tx.clone();
        let clock = self.clock.clone();
        let offset = self.offset;
        let days = days.to_vec();

        let mut tasks = lock(&self.tasks);
        let join = tokio::spawn(async move {
            let mut last_fired = None;
            loop {
                let now = clock.now();
                // Never schedule at or before the previous firing, even if the
                // wall clock reads slightly behind the timer.
                let reference = last_fired.map_or(now, |last| now.max(last));
                let Some(next) = next_occurrence(reference, offset, time_of_day, &days) else {
                    tracing::warn!(handle = handle.0, "daily trigger has no next occurrence; stopping");
                    break;
                };
                let wait = (next - reference).to_std().unwrap_or_default();
                tracing::debug!(handle = handle.0, %next, "daily trigger armed");
                tokio::time::sleep(wait).await;

                if tx.send(payload.clone()).is_err() {
                    tracing::debug!(handle = handle.0, "trigger queue closed; stopping daily trigger");
                    break;
                }
                last_fired = Some(next);
            }
        });
        tasks.insert(handle, join);
        handle
    }

    fn schedule_once(&self, delay: Duration, payload: P) -> TriggerHandle {
        let handle = self.next_handle();
        let tx = self.tx.clone();
        let registry = self.tasks.clone();

        // Holding the map lock while spawning keeps a zero-delay entry from
        // removing itself before it was inserted.
        let mut tasks = lock(&self.tasks);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&registry).remove(&handle);
            if tx.send(payload).is_err() {
                tracing::debug!(handle = handle.0, "trigger queue closed; one-shot dropped");
            }
        });
        tasks.insert(handle, join);
        handle
    }

    fn cancel(&self, handle: TriggerHandle) {
        if let Some(join) = lock(&self.tasks).remove(&handle) {
            join.abort();
            tracing::debug!(handle = handle.0, "trigger cancelled");
        }
    }
}

impl<P> Drop for TokioScheduler<P> {
    fn drop(&mut self) {
        for (_, join) in lock(&self.tasks).drain() {
            join.abort();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Entry<P> {
        Daily {
            time: NaiveTime,
            days: Vec<Weekday>,
            payload: P,
        },
        Once {
            delay: Duration,
            payload: P,
        },
    }

    /// Records what was scheduled; tests fire payloads by hand.
    #[derive(Debug)]
    pub struct RecordingScheduler<P> {
        next_id: AtomicU64,
        entries: Mutex<Vec<(TriggerHandle, Entry<P>)>>,
    }

    impl<P: Clone> RecordingScheduler<P> {
        pub fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }
        }

        pub fn live(&self) -> Vec<(TriggerHandle, Entry<P>)> {
            lock(&self.entries).clone()
        }

        pub fn once_payloads(&self) -> Vec<(Duration, P)> {
            lock(&self.entries)
                .iter()
                .filter_map(|(_, e)| match e {
                    Entry::Once { delay, payload } => Some((*delay, payload.clone())),
                    _ => None,
                })
                .collect()
        }

        pub fn daily_count(&self) -> usize {
            lock(&self.entries)
                .iter()
                .filter(|(_, e)| matches!(e, Entry::Daily { .. }))
                .count()
        }

        /// Simulate a one-shot firing: it leaves the live set.
        pub fn take_once(&self, handle: TriggerHandle) -> Option<P> {
            let mut entries = lock(&self.entries);
            let idx = entries.iter().position(|(h, _)| *h == handle)?;
            match entries.remove(idx).1 {
                Entry::Once { payload, .. } => Some(payload),
                other => {
                    entries.insert(idx, (handle, other));
                    None
                }
            }
        }

        fn push(&self, entry: Entry<P>) -> TriggerHandle {
            let handle = TriggerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
            lock(&self.entries).push((handle, entry));
            handle
        }
    }

    impl<P: Clone + Send> TriggerScheduler<P> for RecordingScheduler<P> {
        fn schedule_daily(&self, time: NaiveTime, days: &[Weekday], payload: P) -> TriggerHandle {
            self.push(Entry::Daily {
                time,
                days: days.to_vec(),
                payload,
            })
        }

        fn schedule_once(&self, delay: Duration, payload: P) -> TriggerHandle {
            self.push(Entry::Once { delay, payload })
        }

        fn cancel(&self, handle: TriggerHandle) {
            lock(&self.entries).retain(|(h, _)| *h != handle);
        }
    }
}
