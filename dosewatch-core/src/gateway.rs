//! Notification gateway: the engine's view of the chat transport.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::access::Identity;
use crate::error::Result;

/// Points at a previously sent prompt so it can be edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat: Identity,
    pub message_id: i64,
}

/// Outbound side of the transport. Every call is best-effort: callers log
/// failures and move on.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Send a dose prompt carrying exactly one "taken" action. Activating the
    /// action must come back as an acknowledgment for `dose_label`, tagged
    /// with `dose_date` when the transport can carry it.
    async fn prompt(&self, subscriber: Identity, dose_label: &str, dose_date: NaiveDate) -> Result<MessageHandle>;

    async fn notify(&self, recipient: Identity, text: &str) -> Result<()>;

    /// Replace the prompt's content, removing its action.
    async fn reply(&self, message: &MessageHandle, text: &str) -> Result<()>;
}

#[async_trait]
impl<T: NotificationGateway + ?Sized> NotificationGateway for Arc<T> {
    async fn prompt(&self, subscriber: Identity, dose_label: &str, dose_date: NaiveDate) -> Result<MessageHandle> {
        (**self).prompt(subscriber, dose_label, dose_date).await
    }

    async fn notify(&self, recipient: Identity, text: &str) -> Result<()> {
        (**self).notify(recipient, text).await
    }

    async fn reply(&self, message: &MessageHandle, text: &str) -> Result<()> {
        (**self).reply(message, text).await
    }
}
