//! Telegram Bot API transport: outbound gateway plus the long-polling loop
//! that turns chat updates into engine events.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dosewatch_core::messages::{self, TAKEN_BUTTON};
use dosewatch_core::{Acknowledgment, Clock, DoseError, Event, Identity, MessageHandle, NotificationGateway};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;

const CALLBACK_PREFIX: &str = "taken:";
const CALLBACK_DATE: &str = "%Y-%m-%d";
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

pub struct TelegramClient {
    http: Client,
    endpoint: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, poll_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            // Must outlive the long-poll window.
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> dosewatch_core::Result<T> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| DoseError::transport(format!("{method}: {}", e.without_url())))?;

        let status = resp.status();
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| DoseError::transport(format!("{method}: HTTP {status}: {}", e.without_url())))?;
        unwrap_envelope(method, envelope)
    }

    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> dosewatch_core::Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body).await
    }

    pub async fn answer_callback(&self, callback_id: &str) -> dosewatch_core::Result<()> {
        let _: bool = self
            .call("answerCallbackQuery", &json!({ "callback_query_id": callback_id }))
            .await?;
        Ok(())
    }

    async fn send_message(&self, body: Value) -> dosewatch_core::Result<Message> {
        self.call("sendMessage", &body).await
    }
}

fn unwrap_envelope<T>(method: &str, envelope: Envelope<T>) -> dosewatch_core::Result<T> {
    match envelope {
        Envelope {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        Envelope { description, .. } => Err(DoseError::transport(format!(
            "{method}: {}",
            description.unwrap_or_else(|| "request rejected".to_string())
        ))),
    }
}

/// sendMessage body carrying the single "taken" button for `label` on `date`.
/// The button data is `taken:<date>:<label>`, well under Telegram's 64 bytes.
fn prompt_body(chat: Identity, label: &str, date: NaiveDate) -> Value {
    json!({
        "chat_id": chat.0,
        "text": messages::prompt(label),
        "reply_markup": {
            "inline_keyboard": [[{
                "text": TAKEN_BUTTON,
                "callback_data": format!("{CALLBACK_PREFIX}{}:{label}", date.format(CALLBACK_DATE)),
            }]],
        },
    })
}

#[async_trait]
impl NotificationGateway for TelegramClient {
    async fn prompt(
        &self,
        subscriber: Identity,
        dose_label: &str,
        dose_date: NaiveDate,
    ) -> dosewatch_core::Result<MessageHandle> {
        let sent = self.send_message(prompt_body(subscriber, dose_label, dose_date)).await?;
        Ok(MessageHandle {
            chat: Identity(sent.chat.id),
            message_id: sent.message_id,
        })
    }

    async fn notify(&self, recipient: Identity, text: &str) -> dosewatch_core::Result<()> {
        self.send_message(json!({ "chat_id": recipient.0, "text": text }))
            .await
            .map(drop)
    }

    async fn reply(&self, message: &MessageHandle, text: &str) -> dosewatch_core::Result<()> {
        // No reply_markup: the button disappears with the edit.
        let body = json!({
            "chat_id": message.chat.0,
            "message_id": message.message_id,
            "text": text,
        });
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }
}

/// Split button data after the prefix into its dose date and label.
/// Buttons sent before dates were added carry only the label.
fn split_callback(payload: &str) -> (Option<NaiveDate>, &str) {
    match payload.split_once(':') {
        Some((date, label)) => match NaiveDate::parse_from_str(date, CALLBACK_DATE) {
            Ok(date) => (Some(date), label),
            Err(_) => (None, payload),
        },
        None => (None, payload),
    }
}

/// Map one update to an engine event. Anything unrecognised yields `None`.
pub fn parse_update(update: &Update, now: DateTime<Utc>) -> Option<Event> {
    if let Some(cb) = &update.callback_query {
        let payload = cb.data.as_deref()?.strip_prefix(CALLBACK_PREFIX)?;
        let (dose_date, label) = split_callback(payload);
        return Some(Event::Acknowledge(Acknowledgment {
            from: Identity(cb.from.id),
            dose_label: label.to_string(),
            at: now,
            message: cb.message.as_ref().map(|m| MessageHandle {
                chat: Identity(m.chat.id),
                message_id: m.message_id,
            }),
            dose_date,
        }));
    }

    let msg = update.message.as_ref()?;
    let from = Identity(msg.from.as_ref()?.id);
    let command = msg.text.as_deref()?.split_whitespace().next()?;
    // "/start@SomeBot" in group chats.
    let command = command.split('@').next().unwrap_or(command);
    match command {
        "/start" => Some(Event::Register { identity: from }),
        "/status" => Some(Event::StatusRequest { requester: from }),
        "/week" => Some(Event::WeeklyRequest { requester: from }),
        _ => None,
    }
}

/// Long-poll `getUpdates` and forward events until the engine queue closes.
pub async fn poll_updates(
    client: Arc<TelegramClient>,
    tx: mpsc::UnboundedSender<Event>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
) {
    let mut offset = 0;
    tracing::info!(timeout_secs = timeout.as_secs(), "polling Telegram for updates");

    loop {
        let updates = match client.get_updates(offset, timeout).await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, "getUpdates failed; retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            if let Some(cb) = &update.callback_query {
                // Stops the client-side spinner; the engine edits the prompt itself.
                if let Err(e) = client.answer_callback(&cb.id).await {
                    tracing::debug!(error = %e, "answerCallbackQuery failed");
                }
            }

            let Some(event) = parse_update(&update, clock.now()) else {
                tracing::debug!(update_id = update.update_id, "ignoring update");
                continue;
            };
            tracing::debug!(update_id = update.update_id, event = event.kind(), "update received");
            if tx.send(event).is_err() {
                tracing::info!("engine queue closed; stopping poller");
                return;
            }
        }
    }
}
