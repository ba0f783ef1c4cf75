//! Tier sequencing: decides which tier a run executes next.

mod plan;
mod traits;

pub use plan::{parse_plan, PlanLayout, PlanSequencer, PlanTier, PLAN_FILE};
pub use traits::TierSequencer;
