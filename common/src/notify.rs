// Notification delivery
//
// The dispatcher and the built-in commands post notifications through the
// `NotificationSink` seam. Channel protocols live outside this crate: the bus sink
// hands notifications to whatever frontend subscribed to `notice.message`.

use crate::events::{EventBus, EventType};
use crate::models::Notification;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, notification: Notification) -> Result<()>;
}

/// Log-based sink, used when no channel frontend is attached
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    #[tracing::instrument(skip_all, fields(title = %notification.title))]
    async fn post(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            channel = notification.channel.map(|c| c.to_string()),
            source = notification.source.as_deref(),
            user = notification.userid.as_deref(),
            text = notification.text.as_deref(),
            link = notification.link.as_deref(),
            "Notification: {}",
            notification.title
        );
        Ok(())
    }
}

/// Publishes notifications as `notice.message` events
pub struct BusNotifier {
    bus: Arc<EventBus>,
}

impl BusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSink for BusNotifier {
    async fn post(&self, notification: Notification) -> Result<()> {
        let payload =
            serde_json::to_value(&notification).context("Failed to serialize notification")?;
        self.bus.publish(EventType::NoticeMessage, payload);
        Ok(())
    }
}
