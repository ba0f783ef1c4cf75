//! Mock task invoker for testing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::invoker::TaskInvoker;
use crate::run::{RunContext, WorkItem};
use crate::step::{StepError, StepOutcome};

/// A recorded invocation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeCall {
    pub run_id: String,
    pub tier_id: String,
    pub item_id: String,
}

/// Mock implementation of the TaskInvoker trait.
///
/// Provides controllable behavior for testing:
/// - Per-item scripted outcomes, consumed in order
/// - Sticky failures and panics for specific items
/// - Per-item or default delays
/// - Concurrency tracking (peak in-flight invocations)
/// - Cancelling a token after N completed invocations
///
/// Items without a script succeed with `{"item_id": .., "tier_id": ..}`.
///
/// # Example
///
/// ```rust,ignore
/// let invoker = ScriptedInvoker::new();
/// invoker.script("intro", vec![
///     Err(StepError::transient("timeout")),
///     Ok(json!({"text": "hello"})),
/// ]).await;
/// ```
pub struct ScriptedInvoker {
    scripts: Arc<RwLock<HashMap<String, VecDeque<StepOutcome<Value>>>>>,
    always: Arc<RwLock<HashMap<String, StepError>>>,
    panics: Arc<RwLock<HashSet<String>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    default_delay: Option<Duration>,
    calls: Arc<RwLock<Vec<InvokeCall>>>,
    cancel_after: Arc<RwLock<Option<(usize, CancellationToken)>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInvoker {
    /// Create an invoker where every item succeeds immediately.
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(RwLock::new(HashMap::new())),
            always: Arc::new(RwLock::new(HashMap::new())),
            panics: Arc::new(RwLock::new(HashSet::new())),
            delays: Arc::new(RwLock::new(HashMap::new())),
            default_delay: None,
            calls: Arc::new(RwLock::new(Vec::new())),
            cancel_after: Arc::new(RwLock::new(None)),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Delay every invocation that has no per-item delay.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Queue outcomes for an item. Once drained, the item succeeds.
    pub async fn script(&self, item_id: &str, outcomes: Vec<StepOutcome<Value>>) {
        self.scripts
            .write()
            .await
            .entry(item_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Make every invocation of an item fail with `error`.
    pub async fn fail_always(&self, item_id: &str, error: StepError) {
        self.always.write().await.insert(item_id.to_string(), error);
    }

    /// Make every invocation of an item panic.
    pub async fn panic_on(&self, item_id: &str) {
        self.panics.write().await.insert(item_id.to_string());
    }

    /// Delay invocations of one item.
    pub async fn set_delay(&self, item_id: &str, delay: Duration) {
        self.delays.write().await.insert(item_id.to_string(), delay);
    }

    /// Cancel `token` as soon as `calls` invocations have completed.
    pub async fn cancel_after(&self, calls: usize, token: CancellationToken) {
        *self.cancel_after.write().await = Some((calls, token));
    }

    /// Get recorded invocations.
    pub async fn calls(&self) -> Vec<InvokeCall> {
        self.calls.read().await.clone()
    }

    /// Get the number of invocations performed.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Get the number of invocations of one item.
    pub async fn calls_for(&self, item_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.item_id == item_id)
            .count()
    }

    /// Highest number of invocations observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn next_outcome(&self, tier_id: &str, item: &WorkItem) -> StepOutcome<Value> {
        if let Some(err) = self.always.read().await.get(&item.id) {
            return Err(err.clone());
        }
        if let Some(outcome) = self
            .scripts
            .write()
            .await
            .get_mut(&item.id)
            .and_then(|queue| queue.pop_front())
        {
            return outcome;
        }
        Ok(json!({ "item_id": item.id, "tier_id": tier_id }))
    }
}

#[async_trait]
impl TaskInvoker for ScriptedInvoker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, ctx: &RunContext, tier_id: &str, item: &WorkItem) -> StepOutcome<Value> {
        self.calls.write().await.push(InvokeCall {
            run_id: ctx.run_id.clone(),
            tier_id: tier_id.to_string(),
            item_id: item.id.clone(),
        });

        if self.panics.read().await.contains(&item.id) {
            panic!("scripted panic for item {}", item.id);
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .delays
            .read()
            .await
            .get(&item.id)
            .copied()
            .or(self.default_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.next_outcome(tier_id, item).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &*self.cancel_after.read().await {
            if completed == *limit {
                token.cancel();
            }
        }

        outcome
    }
}
