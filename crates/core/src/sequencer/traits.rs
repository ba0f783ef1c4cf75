//! Trait definitions for tier sequencers.

use async_trait::async_trait;

use crate::run::{RunContext, Tier};
use crate::step::StepOutcome;

/// Determines the next pending tier of a run.
#[async_trait]
pub trait TierSequencer: Send + Sync {
    /// Returns the name of this sequencer implementation.
    fn name(&self) -> &str;

    /// Returns the next pending tier, or `None` when no tiers remain.
    ///
    /// Fails with `Unavailable` when the backing source cannot be reached
    /// and with `Invalid` when the run itself is malformed.
    async fn next(&self, ctx: &RunContext) -> StepOutcome<Option<Tier>>;
}
