//! Adherence engine: prompts, acknowledgments, escalations and reports.
//!
//! Every input (scheduled triggers, chat commands, button taps) arrives as an
//! [`Event`] on one queue and is handled to completion before the next one,
//! so an acknowledgment can never interleave with the escalation check for
//! the same dose. The state store lock is only held for the store operation
//! itself, never across a gateway call.
//!
//! Per (date, dose) the lifecycle is:
//!
//! ```text
//!  SCHEDULED --dose due--> PROMPTED --ack before deadline--> ACKNOWLEDGED
//!                              |
//!                              +--deadline, still unacked--> ESCALATED
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use tokio::sync::{Mutex, mpsc};

use crate::access::{AccessPolicy, Identity};
use crate::error::Result;
use crate::gateway::{MessageHandle, NotificationGateway};
use crate::messages;
use crate::report::{self, DailySummary, WeeklySummary};
use crate::schedule::Schedule;
use crate::scheduler::{TriggerHandle, TriggerScheduler};
use crate::store::{SnapshotBackend, StateStore};
use crate::time::{Clock, last_occurrence_date, local_date};

/// When the periodic summaries go out. `None` disables a report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportPlan {
    pub daily_at: Option<NaiveTime>,
    pub weekly: Option<(Weekday, NaiveTime)>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub schedule: Schedule,
    pub access: AccessPolicy,
    pub offset: FixedOffset,
    pub reports: ReportPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    DoseDue {
        label: String,
    },
    EscalationCheck {
        date: NaiveDate,
        label: String,
        subscriber: Identity,
    },
    DailyReport,
    WeeklyReport,
}

/// The subscriber tapped "taken".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub from: Identity,
    pub dose_label: String,
    pub at: DateTime<Utc>,
    /// The prompt the tap came from, when known.
    pub message: Option<MessageHandle>,
    /// Day of the prompt the tap answers, when the transport carries it.
    pub dose_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Trigger(Trigger),
    Register { identity: Identity },
    Acknowledge(Acknowledgment),
    StatusRequest { requester: Identity },
    WeeklyRequest { requester: Identity },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Trigger(Trigger::DoseDue { .. }) => "dose_due",
            Event::Trigger(Trigger::EscalationCheck { .. }) => "escalation_check",
            Event::Trigger(Trigger::DailyReport) => "daily_report",
            Event::Trigger(Trigger::WeeklyReport) => "weekly_report",
            Event::Register { .. } => "register",
            Event::Acknowledge(_) => "acknowledge",
            Event::StatusRequest { .. } => "status_request",
            Event::WeeklyRequest { .. } => "weekly_request",
        }
    }
}

impl From<Trigger> for Event {
    fn from(t: Trigger) -> Self {
        Event::Trigger(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Recorded {
        date: NaiveDate,
        label: String,
        escalation_cancelled: bool,
    },
    /// Flag was already set; confirmed again, nothing else changed.
    AlreadyRecorded { date: NaiveDate, label: String },
    NotAllowed,
    WrongSubscriber,
    UnknownDose,
}

/// Armed escalation check for one (date, dose).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEscalation {
    pub date: NaiveDate,
    pub dose_label: String,
    pub deadline: DateTime<Utc>,
    pub subscriber: Identity,
    pub prompt: Option<MessageHandle>,
    handle: TriggerHandle,
}

type PendingKey = (NaiveDate, String);

pub struct AdherenceEngine<B, G, S>
where
    B: SnapshotBackend,
    G: NotificationGateway,
    S: TriggerScheduler<Event>,
{
    config: EngineConfig,
    store: Mutex<StateStore<B>>,
    gateway: G,
    scheduler: S,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<PendingKey, PendingEscalation>>,
    recurring: Mutex<Vec<TriggerHandle>>,
}

impl<B, G, S> AdherenceEngine<B, G, S>
where
    B: SnapshotBackend,
    G: NotificationGateway,
    S: TriggerScheduler<Event>,
{
    pub fn new(config: EngineConfig, store: StateStore<B>, gateway: G, scheduler: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store: Mutex::new(store),
            gateway,
            scheduler,
            clock,
            pending: Mutex::new(HashMap::new()),
            recurring: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        local_date(self.clock.now(), self.config.offset)
    }

    /// Arm the recurring triggers if someone is already registered.
    pub async fn start(&self) {
        let subscriber = self.store.lock().await.subscriber();
        match subscriber {
            Some(who) => {
                tracing::info!(subscriber = %who, "resuming schedule for registered subscriber");
                self.arm_recurring().await;
            }
            None => tracing::info!("no subscriber registered yet; waiting for /start"),
        }
    }

    /// Drain the event queue until every sender is gone.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            let kind = event.kind();
            if let Err(e) = self.dispatch(event).await {
                tracing::error!(event = kind, error = %e, "event handler failed");
            }
        }
        tracing::info!("event queue closed; engine stopping");
    }

    pub async fn dispatch(&self, event: Event) -> Result<()> {
        match event {
            Event::Trigger(Trigger::DoseDue { label }) => self.on_dose_due(&label).await,
            Event::Trigger(Trigger::EscalationCheck {
                date,
                label,
                subscriber,
            }) => self.on_escalation_check(date, label, subscriber).await,
            Event::Trigger(Trigger::DailyReport) => {
                self.send_daily_report().await;
                Ok(())
            }
            Event::Trigger(Trigger::WeeklyReport) => {
                self.send_weekly_report().await;
                Ok(())
            }
            Event::Register { identity } => self.register(identity).await.map(drop),
            Event::Acknowledge(ack) => self.acknowledge(ack).await.map(drop),
            Event::StatusRequest { requester } => {
                self.answer_status(requester, false).await;
                Ok(())
            }
            Event::WeeklyRequest { requester } => {
                self.answer_status(requester, true).await;
                Ok(())
            }
        }
    }

    /// Bind `identity` as the subscriber and re-derive every trigger for it.
    pub async fn register(&self, identity: Identity) -> Result<RegisterOutcome> {
        if !self.config.access.is_allowed(identity) {
            tracing::info!(identity = %identity, "registration rejected: not on allow-list");
            self.send(identity, &messages::not_authorized()).await;
            return Ok(RegisterOutcome::NotAllowed);
        }

        let bound = self.store.lock().await.bind_subscriber(identity);
        // The binding lives in memory either way, so triggers follow it.
        self.rearm_for(identity).await;

        if let Err(e) = bound {
            self.send(identity, &messages::try_again()).await;
            return Err(e);
        }

        tracing::info!(subscriber = %identity, "subscriber registered");
        self.send(identity, &messages::greeting()).await;
        Ok(RegisterOutcome::Registered)
    }

    pub async fn acknowledge(&self, ack: Acknowledgment) -> Result<AckOutcome> {
        let Acknowledgment {
            from,
            dose_label,
            at,
            message,
            dose_date,
        } = ack;

        if !self.config.access.is_allowed(from) {
            tracing::info!(identity = %from, "acknowledgment rejected: not on allow-list");
            self.respond(from, message.as_ref(), &messages::not_authorized()).await;
            return Ok(AckOutcome::NotAllowed);
        }

        let (date, written) = {
            let mut store = self.store.lock().await;
            if store.subscriber() != Some(from) {
                drop(store);
                tracing::info!(identity = %from, label = %dose_label, "acknowledgment from non-subscriber rejected");
                self.respond(from, message.as_ref(), &messages::not_yours()).await;
                return Ok(AckOutcome::WrongSubscriber);
            }
            let Some(slot) = self.config.schedule.slot(&dose_label) else {
                drop(store);
                tracing::debug!(label = %dose_label, "acknowledgment for unknown dose");
                self.respond(from, message.as_ref(), &messages::unknown_dose(&dose_label))
                    .await;
                return Ok(AckOutcome::UnknownDose);
            };
            // A tap answers the prompt it came from, not the day it arrives on.
            // Without a date, that is the latest occurrence at or before the tap.
            let latest = last_occurrence_date(at, self.config.offset, slot.time_of_day);
            let date = dose_date.map_or(latest, |d| d.min(latest));
            (date, store.set_acknowledged(date, &dose_label))
        };

        let transitioned = match written {
            Ok(t) => t,
            Err(e) => {
                self.respond(from, message.as_ref(), &messages::try_again()).await;
                return Err(e);
            }
        };

        let pending = self.pending.lock().await.remove(&(date, dose_label.clone()));
        if let Some(p) = &pending {
            self.scheduler.cancel(p.handle);
        }

        let slot_index = self.config.schedule.position(&dose_label).unwrap_or(0);
        let target = message.or_else(|| pending.as_ref().and_then(|p| p.prompt.clone()));
        self.respond(from, target.as_ref(), &messages::confirmation(date, slot_index))
            .await;

        if !transitioned {
            tracing::debug!(%date, label = %dose_label, "duplicate acknowledgment");
            return Ok(AckOutcome::AlreadyRecorded {
                date,
                label: dose_label,
            });
        }

        tracing::info!(%date, label = %dose_label, escalation_cancelled = pending.is_some(), "dose acknowledged");
        if let Some(observer) = self.config.access.observer() {
            self.send(observer, &messages::observer_taken(&dose_label, date)).await;
        }

        Ok(AckOutcome::Recorded {
            date,
            label: dose_label,
            escalation_cancelled: pending.is_some(),
        })
    }

    pub async fn daily_summary(&self, date: NaiveDate) -> DailySummary {
        let store = self.store.lock().await;
        report::daily_summary(store.history(), &self.config.schedule, date)
    }

    pub async fn weekly_summary(&self, end: NaiveDate) -> WeeklySummary {
        let store = self.store.lock().await;
        report::weekly_summary(store.history(), &self.config.schedule, end)
    }

    pub async fn subscriber(&self) -> Option<Identity> {
        self.store.lock().await.subscriber()
    }

    /// Currently armed escalation checks, oldest date first.
    pub async fn pending_escalations(&self) -> Vec<PendingEscalation> {
        let mut out: Vec<_> = self.pending.lock().await.values().cloned().collect();
        out.sort_by(|a, b| (a.date, &a.dose_label).cmp(&(b.date, &b.dose_label)));
        out
    }

    async fn on_dose_due(&self, label: &str) -> Result<()> {
        let Some(slot) = self.config.schedule.slot(label).cloned() else {
            tracing::warn!(label, "dose trigger for a slot that is no longer scheduled");
            return Ok(());
        };

        let now = self.clock.now();
        let date = local_date(now, self.config.offset);

        let subscriber = {
            let mut store = self.store.lock().await;
            let Some(subscriber) = store.subscriber() else {
                tracing::debug!(label, "dose due but nobody is registered");
                return Ok(());
            };
            if let Err(e) = store.ensure_day(date) {
                // A blank day reads the same as a missing one; keep reminding.
                tracing::warn!(%date, error = %e, "could not persist new day record; prompting anyway");
            }
            subscriber
        };

        let key = (date, label.to_string());
        if self.pending.lock().await.contains_key(&key) {
            tracing::debug!(%date, label, "escalation already armed for this dose");
            return Ok(());
        }

        tracing::info!(%date, label, subscriber = %subscriber, "dose due; prompting");
        let prompt = match self.gateway.prompt(subscriber, label, date).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(label, error = %e, "failed to deliver dose prompt");
                None
            }
        };

        let deadline = chrono::Duration::from_std(slot.escalation_delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        let pending = self.arm_escalation(date, label, subscriber, slot.escalation_delay, deadline, prompt);
        self.pending.lock().await.insert(key, pending);
        Ok(())
    }

    async fn on_escalation_check(&self, date: NaiveDate, label: String, subscriber: Identity) -> Result<()> {
        self.pending.lock().await.remove(&(date, label.clone()));

        let (current, taken) = {
            let store = self.store.lock().await;
            (store.subscriber(), store.is_acknowledged(date, &label))
        };

        if current != Some(subscriber) {
            tracing::info!(%date, label = %label, "escalation for a previous subscriber dropped");
            return Ok(());
        }
        if taken {
            tracing::debug!(%date, label = %label, "dose acknowledged before deadline");
            return Ok(());
        }

        match self.config.access.observer() {
            Some(observer) => {
                tracing::info!(%date, label = %label, observer = %observer, "dose missed; escalating");
                self.send(observer, &messages::escalation(&label, date)).await;
            }
            None => tracing::warn!(%date, label = %label, "dose missed but no observer is configured"),
        }
        Ok(())
    }

    async fn send_daily_report(&self) {
        let summary = self.daily_summary(self.today()).await;
        let text = messages::daily_report(&summary);
        tracing::info!(date = %summary.date, taken = summary.taken_count, total = summary.total, "sending daily report");
        for who in self.report_recipients().await {
            self.send(who, &text).await;
        }
    }

    async fn send_weekly_report(&self) {
        let summary = self.weekly_summary(self.today()).await;
        let text = messages::weekly_report(&summary);
        tracing::info!(end = %summary.end, taken = summary.taken, possible = summary.possible, "sending weekly report");
        for who in self.report_recipients().await {
            self.send(who, &text).await;
        }
    }

    async fn answer_status(&self, requester: Identity, weekly: bool) {
        let access = &self.config.access;
        if !access.is_allowed(requester) && access.observer() != Some(requester) {
            self.send(requester, &messages::not_authorized()).await;
            return;
        }
        if self.subscriber().await.is_none() {
            self.send(requester, &messages::no_subscriber()).await;
            return;
        }

        let today = self.today();
        let text = if weekly {
            messages::weekly_report(&self.weekly_summary(today).await)
        } else {
            messages::daily_report(&self.daily_summary(today).await)
        };
        self.send(requester, &text).await;
    }

    async fn report_recipients(&self) -> Vec<Identity> {
        let mut out: Vec<Identity> = self.subscriber().await.into_iter().collect();
        if let Some(observer) = self.config.access.observer() {
            if !out.contains(&observer) {
                out.push(observer);
            }
        }
        out
    }

    fn arm_escalation(
        &self,
        date: NaiveDate,
        label: &str,
        subscriber: Identity,
        delay: std::time::Duration,
        deadline: DateTime<Utc>,
        prompt: Option<MessageHandle>,
    ) -> PendingEscalation {
        let handle = self.scheduler.schedule_once(
            delay,
            Trigger::EscalationCheck {
                date,
                label: label.to_string(),
                subscriber,
            }
            .into(),
        );
        PendingEscalation {
            date,
            dose_label: label.to_string(),
            deadline,
            subscriber,
            prompt,
            handle,
        }
    }

    async fn arm_recurring(&self) {
        let mut handles = self.recurring.lock().await;
        for h in handles.drain(..) {
            self.scheduler.cancel(h);
        }

        for slot in self.config.schedule.slots() {
            handles.push(self.scheduler.schedule_daily(
                slot.time_of_day,
                &[],
                Trigger::DoseDue {
                    label: slot.label.clone(),
                }
                .into(),
            ));
        }
        if let Some(at) = self.config.reports.daily_at {
            handles.push(self.scheduler.schedule_daily(at, &[], Trigger::DailyReport.into()));
        }
        if let Some((day, at)) = self.config.reports.weekly {
            handles.push(self.scheduler.schedule_daily(at, &[day], Trigger::WeeklyReport.into()));
        }
        tracing::info!(count = handles.len(), "recurring triggers armed");
    }

    /// Cancel everything armed so far and rebuild it for `subscriber`.
    /// Escalations that belonged to this same subscriber and are still open
    /// are re-armed for their remaining time; anything else is dropped.
    async fn rearm_for(&self, subscriber: Identity) {
        self.arm_recurring().await;

        let now = self.clock.now();
        let stale: Vec<PendingEscalation> = self.pending.lock().await.drain().map(|(_, p)| p).collect();
        let mut kept = Vec::new();
        for p in stale {
            self.scheduler.cancel(p.handle);
            if p.subscriber != subscriber || p.deadline <= now {
                continue;
            }
            if self.store.lock().await.is_acknowledged(p.date, &p.dose_label) {
                continue;
            }
            let remaining = (p.deadline - now).to_std().unwrap_or_default();
            kept.push(self.arm_escalation(p.date, &p.dose_label, subscriber, remaining, p.deadline, p.prompt));
        }

        tracing::debug!(rearmed = kept.len(), "pending escalations recomputed");
        let mut pending = self.pending.lock().await;
        for p in kept {
            pending.insert((p.date, p.dose_label.clone()), p);
        }
    }

    /// Reply in place when we know the originating prompt, otherwise message directly.
    async fn respond(&self, to: Identity, message: Option<&MessageHandle>, text: &str) {
        match message {
            Some(m) => {
                if let Err(e) = self.gateway.reply(m, text).await {
                    tracing::warn!(chat = %m.chat, error = %e, "failed to edit prompt");
                }
            }
            None => self.send(to, text).await,
        }
    }

    async fn send(&self, to: Identity, text: &str) {
        if let Err(e) = self.gateway.notify(to, text).await {
            tracing::warn!(recipient = %to, error = %e, "failed to deliver message");
        }
    }
}
