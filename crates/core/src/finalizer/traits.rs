//! Trait definitions for finalizers.

use async_trait::async_trait;

use crate::run::{Artifact, RunContext, TierStatus};
use crate::step::StepOutcome;

/// Assembles the final artifact once the tier loop terminates.
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Returns the name of this finalizer implementation.
    fn name(&self) -> &str;

    /// Builds the artifact from every recorded tier status.
    async fn finalize(&self, ctx: &RunContext, history: &[TierStatus]) -> StepOutcome<Artifact>;
}
