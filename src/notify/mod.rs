pub mod discord;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("\"{0}\" is not a valid recipient handle")]
    InvalidHandle(String),

    #[error("chat service error: {0}")]
    Chat(#[from] serenity::Error),
}

/// Outbound messages: one recipient at a time, or one channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_direct(&self, recipient: &str, text: &str) -> Result<(), NotifyError>;
    async fn send_broadcast(&self, channel: &str, text: &str) -> Result<(), NotifyError>;
}
