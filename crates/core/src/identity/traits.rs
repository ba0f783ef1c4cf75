//! Trait definitions for client registration.

use async_trait::async_trait;

use crate::run::RunContext;
use crate::step::StepOutcome;

/// Establishes a run's client identity before the tier loop starts.
#[async_trait]
pub trait ClientRegistrar: Send + Sync {
    /// Returns the name of this registrar implementation.
    fn name(&self) -> &str;

    /// Prepares whatever the client needs for the run to proceed.
    async fn register(&self, ctx: &RunContext) -> StepOutcome<()>;
}

/// Registrar that accepts every client without side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

#[async_trait]
impl ClientRegistrar for NoopRegistrar {
    fn name(&self) -> &str {
        "noop"
    }

    async fn register(&self, _ctx: &RunContext) -> StepOutcome<()> {
        Ok(())
    }
}
