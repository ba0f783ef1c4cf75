//! Best-effort progress updates.

mod broadcast;

pub use broadcast::BroadcastProgressPublisher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::events::NotifyError;

/// Advisory progress of a run, pushed after each recorded tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub run_id: String,
    pub tier_id: String,
    /// Between 0.0 and 1.0.
    pub fraction_complete: f64,
    /// Successful tiers so far.
    pub tiers_completed: u32,
    /// Total tiers in the plan, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tiers: Option<u32>,
}

impl ProgressUpdate {
    /// Computes the fraction from the successful tier count.
    ///
    /// Uses the known total when available, otherwise counts one pending
    /// tier if more remain.
    pub fn compute_fraction(succeeded: u32, total: Option<u32>, more_remaining: bool) -> f64 {
        let denominator = match total {
            Some(total) if total > 0 => total,
            _ => succeeded + u32::from(more_remaining),
        };
        if denominator == 0 {
            return 1.0;
        }
        (succeeded as f64 / denominator as f64).clamp(0.0, 1.0)
    }
}

/// Delivers progress updates. No retries; failures are logged by the caller.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn push(&self, update: ProgressUpdate) -> Result<(), NotifyError>;
}
