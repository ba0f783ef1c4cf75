//! Run orchestrator for tiered pipelines.
//!
//! The orchestrator drives a run through its phases:
//! - **Tier loop**: sequential across tiers, one tier at a time
//! - **Fan-out**: concurrent within a tier, bounded by `max_concurrent_items`
//! - **Finalize**: once the loop ends, assemble the artifact

mod config;
mod fanout;
mod runner;
mod service;
mod types;

pub use config::{OrchestratorConfig, TierFailurePolicy};
pub use fanout::FanOutExecutor;
pub use runner::{decide, RunOrchestrator};
pub use service::RunService;
pub use types::{Decision, PhaseTransition, RunError, RunReport};
