//! Adherence aggregation over the stored history.
//!
//! Pure functions: same history in, same summary out. A date with no record
//! counts as "nothing taken".

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::schedule::Schedule;
use crate::store::History;

/// Days covered by the weekly summary, ending date included.
pub const WEEK_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyTier {
    Full,
    None,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyBand {
    /// Every dose taken.
    Perfect,
    /// At least 80%.
    Strong,
    /// At least 50%.
    Fair,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub label: String,
    pub taken: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub slots: Vec<SlotStatus>,
    pub taken_count: usize,
    pub total: usize,
    pub tier: DailyTier,
}

impl DailySummary {
    pub fn is_taken(&self, label: &str) -> Option<bool> {
        self.slots.iter().find(|s| s.label == label).map(|s| s.taken)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub taken: usize,
    pub possible: usize,
    pub ratio: f64,
    pub band: WeeklyBand,
}

impl WeeklySummary {
    pub fn percent(&self) -> u32 {
        (self.ratio * 100.0).round() as u32
    }
}

pub fn daily_summary(history: &History, schedule: &Schedule, date: NaiveDate) -> DailySummary {
    let record = history.get(&date);
    let slots: Vec<SlotStatus> = schedule
        .labels()
        .map(|label| SlotStatus {
            label: label.to_string(),
            taken: record.and_then(|r| r.get(label)).copied().unwrap_or(false),
        })
        .collect();

    let taken_count = slots.iter().filter(|s| s.taken).count();
    let total = slots.len();
    let tier = if taken_count == total {
        DailyTier::Full
    } else if taken_count == 0 {
        DailyTier::None
    } else {
        DailyTier::Partial
    };

    DailySummary {
        date,
        slots,
        taken_count,
        total,
        tier,
    }
}

pub fn weekly_summary(history: &History, schedule: &Schedule, end: NaiveDate) -> WeeklySummary {
    let start = end - Duration::days(WEEK_DAYS - 1);

    let (taken, possible) = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| daily_summary(history, schedule, d))
        .fold((0, 0), |(t, p), day| (t + day.taken_count, p + day.total));

    let ratio = if possible == 0 {
        0.0
    } else {
        taken as f64 / possible as f64
    };

    let band = if possible > 0 && taken == possible {
        WeeklyBand::Perfect
    } else if ratio >= 0.8 {
        WeeklyBand::Strong
    } else if ratio >= 0.5 {
        WeeklyBand::Fair
    } else {
        WeeklyBand::Low
    };

    WeeklySummary {
        start,
        end,
        taken,
        possible,
        ratio,
        band,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::DoseSlot;
    use crate::store::DayRecord;
    use chrono::NaiveTime;

    fn schedule() -> Schedule {
        let t = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        Schedule::new(vec![
            DoseSlot::new("morning", t),
            DoseSlot::new("noon", t),
            DoseSlot::new("night", t),
        ])
        .unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(taken: &[&str]) -> DayRecord {
        ["morning", "noon", "night"]
            .iter()
            .map(|l| (l.to_string(), taken.contains(l)))
            .collect()
    }

    #[test]
    fn missing_day_counts_as_none() {
        let s = daily_summary(&History::new(), &schedule(), date("2024-01-01"));
        assert_eq!(s.taken_count, 0);
        assert_eq!(s.total, 3);
        assert_eq!(s.tier, DailyTier::None);
    }

    #[test]
    fn all_taken_is_full() {
        let mut h = History::new();
        h.insert(date("2024-01-01"), record(&["morning", "noon", "night"]));
        let s = daily_summary(&h, &schedule(), date("2024-01-01"));
        assert_eq!(s.taken_count, s.total);
        assert_eq!(s.tier, DailyTier::Full);
    }

    #[test]
    fn morning_only_is_partial() {
        let mut h = History::new();
        h.insert(date("2024-01-01"), record(&["morning"]));
        let s = daily_summary(&h, &schedule(), date("2024-01-01"));

        assert_eq!(s.is_taken("morning"), Some(true));
        assert_eq!(s.is_taken("noon"), Some(false));
        assert_eq!(s.is_taken("night"), Some(false));
        assert_eq!(s.taken_count, 1);
        assert_eq!(s.tier, DailyTier::Partial);
    }

    #[test]
    fn labels_missing_from_record_read_false() {
        let mut h = History::new();
        let rec: DayRecord = [("morning".to_string(), true)].into_iter().collect();
        h.insert(date("2024-01-01"), rec);
        let s = daily_summary(&h, &schedule(), date("2024-01-01"));
        assert_eq!(s.taken_count, 1);
        assert_eq!(s.total, 3);
    }

    #[test]
    fn week_of_two_thirds_is_fair() {
        let mut h = History::new();
        let end = date("2024-01-07");
        for d in date("2024-01-01").iter_days().take(7) {
            h.insert(d, record(&["morning", "night"]));
        }
        let w = weekly_summary(&h, &schedule(), end);

        assert_eq!(w.start, date("2024-01-01"));
        assert_eq!(w.taken, 14);
        assert_eq!(w.possible, 21);
        assert!((w.ratio - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(w.band, WeeklyBand::Fair);
        assert_eq!(w.percent(), 67);
    }

    #[test]
    fn week_window_ignores_older_days() {
        let mut h = History::new();
        // Outside the window.
        h.insert(date("2023-12-31"), record(&["morning", "noon", "night"]));
        for d in date("2024-01-01").iter_days().take(7) {
            h.insert(d, record(&["morning", "noon", "night"]));
        }
        let w = weekly_summary(&h, &schedule(), date("2024-01-07"));
        assert_eq!(w.taken, 21);
        assert_eq!(w.band, WeeklyBand::Perfect);
    }

    #[test]
    fn week_bands() {
        let end = date("2024-01-07");
        let days: Vec<_> = date("2024-01-01").iter_days().take(7).collect();

        // 18/21 ~ 0.857
        let mut h = History::new();
        for (i, d) in days.iter().enumerate() {
            let taken: &[&str] = if i < 3 { &["morning", "noon"] } else { &["morning", "noon", "night"] };
            h.insert(*d, record(taken));
        }
        assert_eq!(weekly_summary(&h, &schedule(), end).band, WeeklyBand::Strong);

        // Only 3 days on record, all full: 9/21 ~ 0.43
        let mut h = History::new();
        for d in days.iter().take(3) {
            h.insert(*d, record(&["morning", "noon", "night"]));
        }
        assert_eq!(weekly_summary(&h, &schedule(), end).band, WeeklyBand::Low);
    }

    #[test]
    fn acknowledging_every_slot_reads_full() {
        use crate::backend::MemoryBackend;
        use crate::store::StateStore;

        let s = schedule();
        let mut store = StateStore::open(MemoryBackend::new(), &s);
        for d in date("2024-02-27").iter_days().take(4) {
            for label in s.labels() {
                store.set_acknowledged(d, label).unwrap();
            }
            let summary = daily_summary(store.history(), &s, d);
            assert_eq!(summary.taken_count, summary.total);
            assert_eq!(summary.tier, DailyTier::Full);
        }
    }

    #[test]
    fn summaries_are_deterministic() {
        let mut h = History::new();
        h.insert(date("2024-01-03"), record(&["noon"]));
        let s = schedule();
        assert_eq!(
            daily_summary(&h, &s, date("2024-01-03")),
            daily_summary(&h, &s, date("2024-01-03"))
        );
        assert_eq!(
            weekly_summary(&h, &s, date("2024-01-05")),
            weekly_summary(&h, &s, date("2024-01-05"))
        );
    }
}
