//! Mock event emitters and progress publishers for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::events::{DomainEvent, EventEmitter, NotifyError};
use crate::progress::{ProgressPublisher, ProgressUpdate};

/// How a failing notifier misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Return an error immediately.
    Error,
    /// Never complete.
    Stall,
}

/// Event emitter that keeps every published event.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Arc<RwLock<Vec<DomainEvent>>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.read().await.clone()
    }

    /// Event type names in publish order.
    pub async fn event_types(&self) -> Vec<&'static str> {
        self.events
            .read()
            .await
            .iter()
            .map(|e| e.event_type())
            .collect()
    }

    /// Number of events of one type.
    pub async fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
    async fn publish(&self, event: DomainEvent) -> Result<(), NotifyError> {
        self.events.write().await.push(event);
        Ok(())
    }
}

/// Event emitter that never delivers.
pub struct FailingEmitter {
    mode: FailureMode,
}

impl FailingEmitter {
    pub fn new(mode: FailureMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl EventEmitter for FailingEmitter {
    async fn publish(&self, _event: DomainEvent) -> Result<(), NotifyError> {
        match self.mode {
            FailureMode::Error => Err(NotifyError::Transport("emitter offline".to_string())),
            FailureMode::Stall => std::future::pending().await,
        }
    }
}

/// Progress publisher that keeps every update.
#[derive(Default)]
pub struct RecordingPublisher {
    updates: Arc<RwLock<Vec<ProgressUpdate>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.read().await.clone()
    }
}

#[async_trait]
impl ProgressPublisher for RecordingPublisher {
    async fn push(&self, update: ProgressUpdate) -> Result<(), NotifyError> {
        self.updates.write().await.push(update);
        Ok(())
    }
}

/// Progress publisher that never delivers.
pub struct FailingPublisher {
    mode: FailureMode,
}

impl FailingPublisher {
    pub fn new(mode: FailureMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl ProgressPublisher for FailingPublisher {
    async fn push(&self, _update: ProgressUpdate) -> Result<(), NotifyError> {
        match self.mode {
            FailureMode::Error => Err(NotifyError::Transport("push channel offline".to_string())),
            FailureMode::Stall => std::future::pending().await,
        }
    }
}
