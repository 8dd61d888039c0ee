use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, NaiveTime, Weekday};
use dosewatch_core::time::{parse_time_of_day, parse_utc_offset, parse_weekday};
use dosewatch_core::{AccessPolicy, DoseSlot, Identity, ReportPlan, Schedule};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::ensure_dosewatch_home;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub clock: ClockSection,
    pub slots: Vec<SlotSection>,
    pub access: AccessSection,
    pub reports: ReportsSection,
    pub telegram: TelegramSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSection {
    /// Fixed offset all wall-clock times are read in, e.g. "+03:00".
    pub utc_offset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSection {
    pub label: String,
    /// "HH:MM" local time.
    pub time: String,
    #[serde(default = "default_escalation_minutes")]
    pub escalation_minutes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSection {
    pub allowed: Vec<i64>,
    pub observer: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsSection {
    /// Omit to disable the daily report.
    pub daily_time: Option<String>,
    /// Omit to disable the weekly report.
    pub weekly_time: Option<String>,
    pub weekly_day: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    /// Name of the environment variable holding the bot token.
    pub token_env: String,
    pub poll_timeout_secs: u64,
    pub api_base: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub state_file: Option<String>,
}

/// One day.
const MAX_ESCALATION_MINUTES: u64 = 24 * 60;

fn default_escalation_minutes() -> u64 {
    60
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            utc_offset: "+03:00".to_string(),
        }
    }
}

impl Default for ReportsSection {
    fn default() -> Self {
        Self {
            daily_time: Some("21:30".to_string()),
            weekly_time: Some("20:00".to_string()),
            weekly_day: "Sun".to_string(),
        }
    }
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            token_env: "BOT_TOKEN".to_string(),
            poll_timeout_secs: 30,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

fn default_slots() -> Vec<SlotSection> {
    vec![SlotSection {
        label: "evening".to_string(),
        time: "19:00".to_string(),
        escalation_minutes: default_escalation_minutes(),
    }]
}

impl Config {
    /// Built-in defaults, including the single evening slot.
    pub fn with_defaults() -> Self {
        Self {
            slots: default_slots(),
            ..Self::default()
        }
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.clock.utc_offset).context("[clock] utc_offset")
    }

    pub fn schedule(&self) -> Result<Schedule> {
        let slots = if self.slots.is_empty() {
            default_slots()
        } else {
            self.slots.clone()
        };

        let mut out = Vec::with_capacity(slots.len());
        for s in &slots {
            let time = parse_time_of_day(&s.time).with_context(|| format!("[[slots]] {}", s.label))?;
            if s.escalation_minutes == 0 || s.escalation_minutes > MAX_ESCALATION_MINUTES {
                bail!(
                    "[[slots]] {}: escalation_minutes must be between 1 and {MAX_ESCALATION_MINUTES}",
                    s.label
                );
            }
            let delay = Duration::from_secs(s.escalation_minutes * 60);
            out.push(DoseSlot::new(s.label.clone(), time).with_escalation_delay(delay));
        }
        Schedule::new(out).context("[[slots]]")
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(
            self.access.allowed.iter().copied().map(Identity),
            self.access.observer.map(Identity),
        )
    }

    pub fn report_plan(&self) -> Result<ReportPlan> {
        let daily_at = parse_optional_time(self.reports.daily_time.as_deref()).context("[reports] daily_time")?;
        let weekly_at = parse_optional_time(self.reports.weekly_time.as_deref()).context("[reports] weekly_time")?;
        let weekly = match weekly_at {
            Some(at) => {
                let day: Weekday = parse_weekday(&self.reports.weekly_day).context("[reports] weekly_day")?;
                Some((day, at))
            }
            None => None,
        };
        Ok(ReportPlan { daily_at, weekly })
    }

    /// Reads the token from the configured environment variable.
    pub fn bot_token(&self) -> Result<String> {
        let var = &self.telegram.token_env;
        let token = std::env::var(var).with_context(|| format!("{var} is not set (Telegram bot token)"))?;
        if token.trim().is_empty() {
            bail!("{var} is empty");
        }
        Ok(token)
    }

    /// Validate everything the engine needs, so `config check` and `run`
    /// fail on the same mistakes.
    pub fn validate(&self) -> Result<()> {
        self.offset()?;
        self.schedule()?;
        self.report_plan()?;
        if self.access.allowed.is_empty() {
            tracing::warn!("[access] allowed is empty; nobody will be able to register");
        }
        Ok(())
    }
}

fn parse_optional_time(s: Option<&str>) -> Result<Option<NaiveTime>> {
    match s.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Ok(Some(parse_time_of_day(s)?)),
        None => Ok(None),
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_dosewatch_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::with_defaults());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config_to(cfg: &Config, p: &Path) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config_to(&Config::with_defaults(), &p)?;
    println!("Wrote {}", p.display());
    Ok(())
}
