//! Change notifications published after interlocked writes

use crate::error::NotifyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// A record changed; downstream caches keyed on it should be refreshed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub category: String,
    pub key: String,
    pub modified_at: i64,
}

/// Destination for change notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: ChangeNotification) -> Result<(), NotifyError>;
}

/// Sink that forwards notifications into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ChangeNotification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn publish(&self, notification: ChangeNotification) -> Result<(), NotifyError> {
        self.sender
            .send(notification)
            .map_err(|_| NotifyError::Closed)
    }
}

/// Sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn publish(&self, notification: ChangeNotification) -> Result<(), NotifyError> {
        info!(
            category = %notification.category,
            key = %notification.key,
            modified_at = notification.modified_at,
            "record changed"
        );
        Ok(())
    }
}
