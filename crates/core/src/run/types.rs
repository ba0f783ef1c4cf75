//! Run, tier and work item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::step::{FailureClass, StepError};

/// Payload used to seed a new run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSeed {
    /// Client identity the run executes for.
    pub client_id: String,
    /// Execution plan template name (None = shared plan).
    #[serde(default)]
    pub plan: Option<String>,
    /// Opaque data carried through every step.
    #[serde(default)]
    pub payload: Value,
}

impl RunSeed {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            plan: None,
            payload: Value::Null,
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Checks that identifiers are non-empty and safe to use as path segments.
    pub fn validate(&self) -> Result<(), String> {
        if !is_path_safe(&self.client_id) {
            return Err(format!("invalid client_id: {:?}", self.client_id));
        }
        if let Some(plan) = &self.plan {
            if !is_path_safe(plan) {
                return Err(format!("invalid plan name: {:?}", plan));
            }
        }
        Ok(())
    }
}

/// A single path segment made of ASCII alphanumerics, `-`, `_` and `.`,
/// excluding the relative segments `.` and `..`.
pub fn is_path_safe(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment.len() <= 128
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// One pipeline execution.
///
/// Owned exclusively by the run's orchestrator task; the cursor and
/// terminal flag are only mutated there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunContext {
    pub run_id: String,
    pub client_id: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Last tier whose status was recorded.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Number of tiers recorded so far.
    #[serde(default)]
    pub tiers_recorded: u32,
    #[serde(default)]
    pub terminal: bool,
    pub created_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, seed: RunSeed) -> Self {
        Self {
            run_id: run_id.into(),
            client_id: seed.client_id,
            plan: seed.plan,
            payload: seed.payload,
            cursor: None,
            tiers_recorded: 0,
            terminal: false,
            created_at: Utc::now(),
        }
    }

    /// Moves the cursor past a recorded tier.
    pub fn advance(&mut self, tier_id: &str) {
        self.cursor = Some(tier_id.to_string());
        self.tiers_recorded += 1;
    }
}

/// Position of a tier within the whole plan, when the sequencer knows it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierPosition {
    /// 0-based index of this tier.
    pub index: usize,
    /// Total number of tiers in the plan.
    pub total: usize,
    /// Tiers the plan already marked done before this run started.
    #[serde(default)]
    pub done: usize,
}

/// One pending unit of sequencing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier {
    pub id: String,
    pub items: Vec<WorkItem>,
    /// Whether further tiers exist after this one.
    pub more_remaining: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<TierPosition>,
}

impl Tier {
    pub fn new(id: impl Into<String>, items: Vec<WorkItem>, more_remaining: bool) -> Self {
        Self {
            id: id.into(),
            items,
            more_remaining,
            position: None,
        }
    }

    pub fn with_position(mut self, index: usize, total: usize) -> Self {
        self.position = Some(TierPosition {
            index,
            total,
            done: 0,
        });
        self
    }

    /// Counts `done` tiers as complete in progress updates. Needs a position.
    pub fn with_done(mut self, done: usize) -> Self {
        if let Some(position) = self.position.as_mut() {
            position.done = done;
        }
        self
    }
}

/// One element of a tier's parallel batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub payload: Value,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Terminal result of one work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemResult {
    Succeeded { output: Value },
    Failed { error: StepError },
}

/// Recorded outcome of one work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemOutcome {
    pub item_id: String,
    /// Invocations made for this item.
    pub attempts: u32,
    pub result: ItemResult,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, ItemResult::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.result {
            ItemResult::Succeeded { output } => Some(output),
            ItemResult::Failed { .. } => None,
        }
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match &self.result {
            ItemResult::Succeeded { .. } => None,
            ItemResult::Failed { error } => Some(error.class),
        }
    }
}

/// A failing item and its class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: String,
    pub class: FailureClass,
}

/// Aggregate outcome of a tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierAggregate {
    Success,
    Failed { failures: Vec<ItemFailure> },
}

impl TierAggregate {
    pub fn is_success(&self) -> bool {
        matches!(self, TierAggregate::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierAggregate::Success => "success",
            TierAggregate::Failed { .. } => "failed",
        }
    }
}

/// Recorded outcome of a completed tier. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierStatus {
    pub tier_id: String,
    /// 1-based position in the run's history.
    pub sequence: u32,
    pub outcomes: Vec<ItemOutcome>,
    pub aggregate: TierAggregate,
    /// Items never dispatched because the run was cancelled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    pub recorded_at: DateTime<Utc>,
}

impl TierStatus {
    /// Builds a status from terminal item outcomes.
    ///
    /// The aggregate is `Success` only when the tier was not cancelled and
    /// every item succeeded. Skipped items are reported as `Cancelled`
    /// failures.
    pub fn from_outcomes(
        tier_id: impl Into<String>,
        sequence: u32,
        outcomes: Vec<ItemOutcome>,
        skipped: Vec<String>,
        cancelled: bool,
    ) -> Self {
        let mut failures: Vec<ItemFailure> = outcomes
            .iter()
            .filter_map(|o| {
                o.failure_class().map(|class| ItemFailure {
                    item_id: o.item_id.clone(),
                    class,
                })
            })
            .collect();
        failures.extend(skipped.iter().map(|id| ItemFailure {
            item_id: id.clone(),
            class: FailureClass::Cancelled,
        }));

        let aggregate = if failures.is_empty() && !cancelled {
            TierAggregate::Success
        } else {
            TierAggregate::Failed { failures }
        };

        Self {
            tier_id: tier_id.into(),
            sequence,
            outcomes,
            aggregate,
            skipped,
            cancelled,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.aggregate.is_success()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Label used in metrics and events.
    pub fn label(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else {
            self.aggregate.as_str()
        }
    }
}

/// Final artifact produced by the finalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    /// Where the artifact can be retrieved.
    pub artifact_ref: String,
    /// Size in bytes.
    pub bytes: u64,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(id: &str) -> ItemOutcome {
        ItemOutcome {
            item_id: id.to_string(),
            attempts: 1,
            result: ItemResult::Succeeded {
                output: json!({"id": id}),
            },
        }
    }

    fn failed(id: &str, class: FailureClass) -> ItemOutcome {
        ItemOutcome {
            item_id: id.to_string(),
            attempts: 3,
            result: ItemResult::Failed {
                error: StepError::new(class, "boom"),
            },
        }
    }

    #[test]
    fn test_seed_validation() {
        assert!(RunSeed::new("client-1").validate().is_ok());
        assert!(RunSeed::new("client_1.v2").with_plan("plan-a").validate().is_ok());
        assert!(RunSeed::new("").validate().is_err());
        assert!(RunSeed::new("..").validate().is_err());
        assert!(RunSeed::new("a/b").validate().is_err());
        assert!(RunSeed::new("ok").with_plan("../etc").validate().is_err());
    }

    #[test]
    fn test_context_advance() {
        let mut ctx = RunContext::new("run-1", RunSeed::new("c"));
        assert_eq!(ctx.cursor, None);
        ctx.advance("tier1");
        ctx.advance("tier2");
        assert_eq!(ctx.cursor.as_deref(), Some("tier2"));
        assert_eq!(ctx.tiers_recorded, 2);
    }

    #[test]
    fn test_all_success_aggregate() {
        let status =
            TierStatus::from_outcomes("t1", 1, vec![ok("a"), ok("b"), ok("c")], vec![], false);
        assert!(status.is_success());
        assert_eq!(status.succeeded(), 3);
        assert_eq!(status.label(), "success");
    }

    #[test]
    fn test_failed_aggregate_lists_failures() {
        let status = TierStatus::from_outcomes(
            "t1",
            1,
            vec![ok("a"), failed("b", FailureClass::AttemptsExhausted)],
            vec![],
            false,
        );
        assert_eq!(
            status.aggregate,
            TierAggregate::Failed {
                failures: vec![ItemFailure {
                    item_id: "b".to_string(),
                    class: FailureClass::AttemptsExhausted,
                }]
            }
        );
    }

    #[test]
    fn test_cancelled_tier_is_never_success() {
        let status = TierStatus::from_outcomes("t1", 1, vec![ok("a")], vec![], true);
        assert!(!status.is_success());
        assert_eq!(status.label(), "cancelled");

        let status =
            TierStatus::from_outcomes("t1", 1, vec![ok("a")], vec!["b".to_string()], true);
        match status.aggregate {
            TierAggregate::Failed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].class, FailureClass::Cancelled);
            }
            TierAggregate::Success => panic!("expected failed aggregate"),
        }
    }

    #[test]
    fn test_item_result_serialization() {
        let json = serde_json::to_value(ok("a")).unwrap();
        assert_eq!(json["result"]["status"], "succeeded");
        assert_eq!(json["result"]["output"]["id"], "a");
    }
}
