use async_trait::async_trait;
use thiserror::Error;

use super::DomainEvent;

/// Failure of a best-effort notification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    /// The channel buffer is full.
    #[error("notification channel full")]
    ChannelFull,

    /// The receiving side is gone.
    #[error("notification channel closed")]
    ChannelClosed,

    /// The transport rejected the notification.
    #[error("notification transport error: {0}")]
    Transport(String),
}

/// Publishes domain events. Failures are observational only.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), NotifyError>;
}
