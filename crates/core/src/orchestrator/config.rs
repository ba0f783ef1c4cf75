//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// What the loop does after a tier whose aggregate failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierFailurePolicy {
    /// Finalize right away without dispatching further tiers.
    #[default]
    Stop,
    /// Keep going and list the failed tiers in the outcome.
    Continue,
}

/// Configuration for the run orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum work items in flight per tier.
    /// Items beyond the limit queue until a slot frees.
    #[serde(default = "default_max_concurrent_items")]
    pub max_concurrent_items: usize,

    /// Maximum runs executing at once (0 = unlimited).
    /// Queued runs wait in `initializing`.
    #[serde(default)]
    pub max_concurrent_runs: usize,

    /// Behaviour after a failed tier.
    #[serde(default)]
    pub tier_failure_policy: TierFailurePolicy,

    /// Upper bound on each progress push or event publish (milliseconds).
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_ms: u64,

    /// Domain event channel capacity.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Progress broadcast channel capacity.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_max_concurrent_items() -> usize {
    8
}

fn default_notify_timeout() -> u64 {
    2000 // 2 seconds
}

fn default_event_buffer() -> usize {
    1024
}

fn default_progress_buffer() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_items: default_max_concurrent_items(),
            max_concurrent_runs: 0,
            tier_failure_policy: TierFailurePolicy::default(),
            notify_timeout_ms: default_notify_timeout(),
            event_buffer: default_event_buffer(),
            progress_buffer: default_progress_buffer(),
        }
    }
}
