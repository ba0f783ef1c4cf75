use std::sync::Arc;

use tierflow_core::events::EventStore;
use tierflow_core::progress::BroadcastProgressPublisher;
use tierflow_core::{Config, RunService, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    runs: Arc<RunService>,
    event_store: Arc<dyn EventStore>,
    progress: Arc<BroadcastProgressPublisher>,
}

impl AppState {
    pub fn new(
        config: Config,
        runs: Arc<RunService>,
        event_store: Arc<dyn EventStore>,
        progress: Arc<BroadcastProgressPublisher>,
    ) -> Self {
        Self {
            config,
            runs,
            event_store,
            progress,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn runs(&self) -> &RunService {
        &self.runs
    }

    pub fn event_store(&self) -> &dyn EventStore {
        self.event_store.as_ref()
    }

    pub fn progress(&self) -> &BroadcastProgressPublisher {
        &self.progress
    }
}
