//! Progress publisher backed by a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::events::NotifyError;

use super::{ProgressPublisher, ProgressUpdate};

/// Fans progress updates out to every live subscriber (e.g. WebSocket clients).
#[derive(Debug, Clone)]
pub struct BroadcastProgressPublisher {
    sender: broadcast::Sender<ProgressUpdate>,
}

impl BroadcastProgressPublisher {
    /// Create a new publisher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to receive updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastProgressPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ProgressPublisher for BroadcastProgressPublisher {
    async fn push(&self, update: ProgressUpdate) -> Result<(), NotifyError> {
        // A send error only means no one is listening
        let _ = self.sender.send(update);
        Ok(())
    }
}
