//! Tier sequencer reading a client's execution plan from disk.
//!
//! A plan is a JSON object keyed by `tierN`:
//!
//! ```json
//! {
//!   "tier1": { "status": false, "items": [ { "key": "summary" } ] },
//!   "tier2": { "status": false, "items": [ { "key": "audience" }, { "key": "pricing" } ] }
//! }
//! ```
//!
//! Tiers are ordered by their numeric suffix. A tier is pending while its
//! `status` is false and the run has not recorded it yet.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::run::{RunContext, Tier, WorkItem};
use crate::status::StatusStore;
use crate::step::{StepError, StepOutcome};

use super::TierSequencer;

/// File name of every execution plan.
pub const PLAN_FILE: &str = "execution_plan.json";

/// Locations of plan templates and client copies under one root.
#[derive(Debug, Clone)]
pub struct PlanLayout {
    root: PathBuf,
}

impl PlanLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<plan>/execution_plan.json`
    pub fn template_path(&self, plan: &str) -> PathBuf {
        self.root.join(plan).join(PLAN_FILE)
    }

    /// `<root>/<client_id>/<plan>/execution_plan.json`
    pub fn client_path(&self, client_id: &str, plan: &str) -> PathBuf {
        self.root.join(client_id).join(plan).join(PLAN_FILE)
    }

    /// `<root>/execution_plan.json`, used by runs without a plan name.
    pub fn shared_path(&self) -> PathBuf {
        self.root.join(PLAN_FILE)
    }

    /// The plan a run reads its tiers from.
    pub fn plan_for(&self, ctx: &RunContext) -> PathBuf {
        match &ctx.plan {
            Some(plan) => self.client_path(&ctx.client_id, plan),
            None => self.shared_path(),
        }
    }
}

/// One tier as declared in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTier {
    pub name: String,
    pub number: u64,
    pub done: bool,
    pub items: Vec<WorkItem>,
}

/// Parses a plan document into tiers ordered by number.
pub fn parse_plan(doc: &Value) -> Result<Vec<PlanTier>, String> {
    let object = doc
        .as_object()
        .ok_or_else(|| "execution plan must be a JSON object".to_string())?;

    let mut tiers = Vec::with_capacity(object.len());
    for (name, tier) in object {
        let number = name
            .strip_prefix("tier")
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| format!("malformed tier name: {}", name))?;

        let Some(tier) = tier.as_object() else {
            debug!("Skipping non-object plan entry {}", name);
            continue;
        };

        let done = tier.get("status").and_then(Value::as_bool).unwrap_or(false);

        let items = match tier.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    let key = item
                        .get("key")
                        .and_then(Value::as_str)
                        .ok_or_else(|| format!("item without a key in {}", name))?;
                    Ok(WorkItem::new(key, item.clone()))
                })
                .collect::<Result<Vec<_>, String>>()?,
            Some(_) => return Err(format!("items of {} must be an array", name)),
        };

        tiers.push(PlanTier {
            name: name.clone(),
            number,
            done,
            items,
        });
    }

    tiers.sort_by_key(|t| t.number);
    Ok(tiers)
}

/// Sequencer backed by execution plan files and the run's recorded history.
pub struct PlanSequencer {
    layout: PlanLayout,
    status_store: Arc<dyn StatusStore>,
}

impl PlanSequencer {
    pub fn new(layout: PlanLayout, status_store: Arc<dyn StatusStore>) -> Self {
        Self {
            layout,
            status_store,
        }
    }

    async fn load(&self, path: &Path) -> StepOutcome<Vec<PlanTier>> {
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                StepError::invalid(format!("execution plan not found: {}", path.display()))
            }
            _ => StepError::unavailable(format!(
                "failed to read execution plan {}: {}",
                path.display(),
                e
            )),
        })?;

        let doc: Value = serde_json::from_slice(&bytes).map_err(|e| {
            StepError::invalid(format!("unparsable execution plan {}: {}", path.display(), e))
        })?;

        parse_plan(&doc).map_err(StepError::invalid)
    }
}

#[async_trait]
impl TierSequencer for PlanSequencer {
    fn name(&self) -> &str {
        "plan"
    }

    async fn next(&self, ctx: &RunContext) -> StepOutcome<Option<Tier>> {
        let tiers = self.load(&self.layout.plan_for(ctx)).await?;

        let recorded: HashSet<String> = self
            .status_store
            .tier_history(&ctx.run_id)
            .map_err(|e| StepError::unavailable(format!("status store: {}", e)))?
            .into_iter()
            .map(|s| s.tier_id)
            .collect();

        let total = tiers.len();
        let done = tiers.iter().filter(|t| t.done).count();
        let pending: Vec<(usize, &PlanTier)> = tiers
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.done && !recorded.contains(&t.name))
            .collect();

        let Some(&(index, next)) = pending.first() else {
            debug!(run_id = %ctx.run_id, "No pending tiers");
            return Ok(None);
        };

        let tier = Tier::new(next.name.clone(), next.items.clone(), pending.len() > 1)
            .with_position(index, total)
            .with_done(done);
        Ok(Some(tier))
    }
}
