pub mod config;
pub mod events;
pub mod finalizer;
pub mod identity;
pub mod invoker;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod run;
pub mod sequencer;
pub mod status;
pub mod step;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use orchestrator::{
    OrchestratorConfig, RunError, RunOrchestrator, RunReport, RunService, TierFailurePolicy,
};
pub use retry::{RetryExecutor, RetryPolicies, RetryPolicy};
pub use run::{RunOutcome, RunPhase, RunSeed};
pub use step::{FailureClass, StepError, StepOutcome};
