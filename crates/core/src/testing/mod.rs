//! Testing utilities and mock collaborators.
//!
//! Every collaborator the orchestrator depends on has a scriptable mock
//! here, so runs can be driven end to end without an HTTP endpoint,
//! a plan directory or a database file.
//!
//! # Example
//!
//! ```rust,ignore
//! use tierflow_core::testing::{fixtures, ScriptedInvoker, ScriptedSequencer};
//!
//! let sequencer = ScriptedSequencer::with_tiers(vec![
//!     fixtures::tier("tier1", 3, true),
//!     fixtures::tier("tier2", 2, false),
//! ]);
//! let invoker = ScriptedInvoker::new();
//! invoker.fail_always("tier2-item1", StepError::permanent("bad input")).await;
//! ```

mod mock_finalizer;
mod mock_invoker;
mod mock_notifiers;
mod mock_sequencer;

pub use mock_finalizer::{ScriptedFinalizer, ScriptedRegistrar};
pub use mock_invoker::{InvokeCall, ScriptedInvoker};
pub use mock_notifiers::{
    FailingEmitter, FailingPublisher, FailureMode, RecordingEmitter, RecordingPublisher,
};
pub use mock_sequencer::ScriptedSequencer;

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::json;
    use std::time::Duration;

    use crate::retry::{JitterStrategy, RetryPolicies, RetryPolicy};
    use crate::run::{Tier, WorkItem};

    /// A tier named `id` with items `<id>-item1..=<id>-item<n>`.
    pub fn tier(id: &str, items: usize, more_remaining: bool) -> Tier {
        let items = (1..=items)
            .map(|i| {
                let item_id = format!("{}-item{}", id, i);
                WorkItem::new(item_id.clone(), json!({ "key": item_id }))
            })
            .collect();
        Tier::new(id, items, more_remaining)
    }

    /// Millisecond backoff so retry tests stay fast.
    pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(10))
            .with_jitter(JitterStrategy::Full)
    }

    /// Every step uses [`fast_policy`].
    pub fn fast_policies(max_attempts: u32) -> RetryPolicies {
        RetryPolicies::uniform(fast_policy(max_attempts))
    }

    /// A plan document with `tiers` tiers of `items` items each.
    pub fn plan_document(tiers: usize, items: usize) -> serde_json::Value {
        let mut doc = serde_json::Map::new();
        for t in 1..=tiers {
            let entries: Vec<_> = (1..=items)
                .map(|i| json!({ "key": format!("t{}-i{}", t, i), "prompt": format!("part {}", i) }))
                .collect();
            doc.insert(
                format!("tier{}", t),
                json!({ "status": false, "items": entries }),
            );
        }
        serde_json::Value::Object(doc)
    }
}
