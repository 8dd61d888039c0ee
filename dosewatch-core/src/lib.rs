//! dosewatch-core: reminder, acknowledgment and escalation engine for a
//! daily medication schedule.

pub mod access;
pub mod backend;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod report;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod time;

pub use access::{AccessPolicy, Identity};
pub use backend::{FileBackend, MemoryBackend};
pub use engine::{
    AckOutcome, Acknowledgment, AdherenceEngine, EngineConfig, Event, PendingEscalation, RegisterOutcome,
    ReportPlan, Trigger,
};
pub use error::{DoseError, FailOpen, Result};
pub use gateway::{MessageHandle, NotificationGateway};
pub use report::{DailySummary, DailyTier, SlotStatus, WeeklyBand, WeeklySummary, daily_summary, weekly_summary};
pub use schedule::{DEFAULT_ESCALATION_DELAY, DoseSlot, Schedule};
pub use scheduler::{TokioScheduler, TriggerHandle, TriggerScheduler};
pub use store::{DayRecord, HISTORY_DAYS, History, Snapshot, SnapshotBackend, StateStore};
pub use time::{Clock, ManualClock, SystemClock};
