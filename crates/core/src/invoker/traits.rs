//! Trait definitions for task invokers.

use async_trait::async_trait;
use serde_json::Value;

use crate::run::{RunContext, WorkItem};
use crate::step::StepOutcome;

/// Invokes the core computation for one work item.
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    /// Returns the name of this invoker implementation.
    fn name(&self) -> &str;

    /// Runs one attempt for `item` within `tier_id`.
    ///
    /// Fails with `Transient` for timeouts, throttling and transport faults,
    /// and with `Permanent` for bad input or authorization failures.
    async fn invoke(&self, ctx: &RunContext, tier_id: &str, item: &WorkItem) -> StepOutcome<Value>;
}
