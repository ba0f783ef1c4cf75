//! Mock tier sequencer for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::run::{RunContext, Tier};
use crate::sequencer::TierSequencer;
use crate::step::{StepError, StepOutcome};

/// Mock implementation of the TierSequencer trait.
///
/// Hands out queued responses in order and reports "no more tiers" once
/// the queue is empty.
pub struct ScriptedSequencer {
    responses: Arc<RwLock<VecDeque<StepOutcome<Option<Tier>>>>>,
    cursors: Arc<RwLock<Vec<Option<String>>>>,
}

impl Default for ScriptedSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSequencer {
    /// Create a sequencer with no tiers.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(RwLock::new(VecDeque::new())),
            cursors: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a sequencer that returns `tiers` in order.
    pub fn with_tiers(tiers: Vec<Tier>) -> Self {
        Self {
            responses: Arc::new(RwLock::new(tiers.into_iter().map(|t| Ok(Some(t))).collect())),
            cursors: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue a tier.
    pub async fn push_tier(&self, tier: Tier) {
        self.responses.write().await.push_back(Ok(Some(tier)));
    }

    /// Queue a failure.
    pub async fn push_error(&self, error: StepError) {
        self.responses.write().await.push_back(Err(error));
    }

    /// Get the number of `next` calls.
    pub async fn call_count(&self) -> usize {
        self.cursors.read().await.len()
    }

    /// The run cursor seen by each `next` call.
    pub async fn seen_cursors(&self) -> Vec<Option<String>> {
        self.cursors.read().await.clone()
    }
}

#[async_trait]
impl TierSequencer for ScriptedSequencer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn next(&self, ctx: &RunContext) -> StepOutcome<Option<Tier>> {
        self.cursors.write().await.push(ctx.cursor.clone());
        self.responses.write().await.pop_front().unwrap_or(Ok(None))
    }
}
