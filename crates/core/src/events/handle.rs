use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use super::{DomainEvent, EventEmitter, EventRecord, EventStore, NotifyError};
use crate::metrics::NOTIFY_FAILURES;

/// Envelopes drained from the channel per store round.
const WRITE_BATCH: usize = 32;

/// Envelope wrapping a domain event with metadata
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: DomainEvent,
}

/// Handle for emitting domain events
///
/// This is cheaply cloneable and can be shared across tasks.
/// Events are sent through a bounded channel to be written by the [`EventWriter`].
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    /// Create a new event handle from a channel sender
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for buffer space
    ///
    /// If the channel is closed, the error is logged but the caller is not failed.
    pub async fn emit(&self, event: DomainEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit event: {}", e);
        }
    }

    /// Try to emit an event without blocking
    pub fn try_emit(&self, event: DomainEvent) -> Result<(), NotifyError> {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::ChannelFull,
            TrySendError::Closed(_) => NotifyError::ChannelClosed,
        })
    }
}

#[async_trait]
impl EventEmitter for EventHandle {
    async fn publish(&self, event: DomainEvent) -> Result<(), NotifyError> {
        self.try_emit(event)
    }
}

impl From<EventEnvelope> for EventRecord {
    fn from(envelope: EventEnvelope) -> Self {
        Self {
            id: 0,
            timestamp: envelope.timestamp,
            event_type: envelope.event.event_type().to_string(),
            run_id: envelope.event.run_id().map(String::from),
            data: envelope.event,
        }
    }
}

/// Drains emitted events into an [`EventStore`].
///
/// Exits once every [`EventHandle`] clone is gone. A failed insert loses that
/// one event; the rest of the batch is still written.
pub struct EventWriter {
    rx: mpsc::Receiver<EventEnvelope>,
    store: Arc<dyn EventStore>,
}

impl EventWriter {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>, store: Arc<dyn EventStore>) -> Self {
        Self { rx, store }
    }

    pub async fn run(mut self) {
        info!("Event writer started");
        let mut batch = Vec::with_capacity(WRITE_BATCH);
        let mut written = 0u64;

        while self.rx.recv_many(&mut batch, WRITE_BATCH).await > 0 {
            for envelope in batch.drain(..) {
                let record = EventRecord::from(envelope);
                match self.store.insert(&record) {
                    Ok(_) => written += 1,
                    Err(e) => {
                        warn!(
                            run_id = ?record.run_id,
                            event_type = %record.event_type,
                            "Failed to store event: {}",
                            e
                        );
                        NOTIFY_FAILURES.with_label_values(&["event", "error"]).inc();
                    }
                }
            }
        }

        info!(written, "Event writer stopped");
    }
}

/// Build the channel pair: emit through the handle, `tokio::spawn(writer.run())`.
pub fn create_event_system(
    store: Arc<dyn EventStore>,
    buffer_size: usize,
) -> (EventHandle, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (EventHandle::new(tx), EventWriter::new(rx, store))
}
