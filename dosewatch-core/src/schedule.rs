//! Static dose schedule: which doses, when, and how long to wait before escalating.

use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveTime;

use crate::error::{DoseError, Result};

/// Default grace period before the observer hears about a missed dose.
pub const DEFAULT_ESCALATION_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseSlot {
    pub label: String,
    pub time_of_day: NaiveTime,
    pub escalation_delay: Duration,
}

impl DoseSlot {
    pub fn new(label: impl Into<String>, time_of_day: NaiveTime) -> Self {
        Self {
            label: label.into(),
            time_of_day,
            escalation_delay: DEFAULT_ESCALATION_DELAY,
        }
    }

    pub fn with_escalation_delay(mut self, delay: Duration) -> Self {
        self.escalation_delay = delay;
        self
    }
}

/// Ordered, non-empty set of dose slots with unique labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    slots: Vec<DoseSlot>,
}

impl Schedule {
    pub fn new(slots: Vec<DoseSlot>) -> Result<Self> {
        if slots.is_empty() {
            return Err(DoseError::schedule("at least one dose slot is required"));
        }

        let mut seen = HashSet::new();
        for slot in &slots {
            let label = slot.label.trim();
            if label.is_empty() {
                return Err(DoseError::schedule("dose slot label cannot be empty"));
            }
            // Labels travel inside the prompt's action payload.
            if label.len() > 32 || label.contains(':') || label.chars().any(char::is_whitespace) {
                return Err(DoseError::schedule(format!(
                    "dose slot label '{label}' must be at most 32 chars without ':' or spaces"
                )));
            }
            if !seen.insert(label.to_string()) {
                return Err(DoseError::schedule(format!("duplicate dose slot label '{label}'")));
            }
        }

        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[DoseSlot] {
        &self.slots
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.label.as_str())
    }

    pub fn slot(&self, label: &str) -> Option<&DoseSlot> {
        self.slots.iter().find(|s| s.label == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.slot(label).is_some()
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.label == label)
    }
}
