//! Registrar that gives each client its own copy of the plan template.

use std::io::ErrorKind;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::run::RunContext;
use crate::sequencer::PlanLayout;
use crate::step::{StepError, StepOutcome};

use super::ClientRegistrar;

/// Copies `<root>/<plan>/execution_plan.json` to
/// `<root>/<client_id>/<plan>/execution_plan.json`.
///
/// Runs without a plan name read the shared plan and need no copy.
pub struct PlanRegistrar {
    layout: PlanLayout,
}

impl PlanRegistrar {
    pub fn new(layout: PlanLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl ClientRegistrar for PlanRegistrar {
    fn name(&self) -> &str {
        "plan"
    }

    async fn register(&self, ctx: &RunContext) -> StepOutcome<()> {
        let Some(plan) = ctx.plan.as_deref() else {
            debug!(run_id = %ctx.run_id, "No plan name, using shared plan");
            return Ok(());
        };

        let source = self.layout.template_path(plan);
        let target = self.layout.client_path(&ctx.client_id, plan);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StepError::unavailable(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    StepError::invalid(format!("plan template not found: {}", source.display()))
                }
                _ => StepError::unavailable(format!(
                    "failed to copy plan {} to {}: {}",
                    source.display(),
                    target.display(),
                    e
                )),
            })?;

        info!(
            run_id = %ctx.run_id,
            client_id = %ctx.client_id,
            "Registered client plan at {}",
            target.display()
        );
        Ok(())
    }
}
