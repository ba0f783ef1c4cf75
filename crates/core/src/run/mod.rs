//! Run data model: contexts, tiers, work items, phases and recorded tier statuses.

mod phase;
mod types;

pub use phase::{RunOutcome, RunPhase};
pub use types::{
    is_path_safe, Artifact, ItemFailure, ItemOutcome, ItemResult, RunContext, RunSeed, Tier,
    TierAggregate, TierPosition, TierStatus, WorkItem,
};
