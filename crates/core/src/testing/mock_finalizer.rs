//! Mock finalizer and registrar for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::finalizer::Finalizer;
use crate::identity::ClientRegistrar;
use crate::run::{Artifact, RunContext, TierStatus};
use crate::step::{StepError, StepOutcome};

/// Mock implementation of the Finalizer trait.
///
/// Records the tier ids it was given and returns an in-memory artifact
/// unless a failure is queued.
pub struct ScriptedFinalizer {
    failures: Arc<RwLock<VecDeque<StepError>>>,
    calls: Arc<RwLock<Vec<Vec<String>>>>,
}

impl Default for ScriptedFinalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFinalizer {
    pub fn new() -> Self {
        Self {
            failures: Arc::new(RwLock::new(VecDeque::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue failures for the next calls.
    pub async fn fail_next(&self, errors: Vec<StepError>) {
        self.failures.write().await.extend(errors);
    }

    /// Get the number of finalize calls.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Tier ids passed to each call.
    pub async fn calls(&self) -> Vec<Vec<String>> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl Finalizer for ScriptedFinalizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn finalize(&self, ctx: &RunContext, history: &[TierStatus]) -> StepOutcome<Artifact> {
        self.calls
            .write()
            .await
            .push(history.iter().map(|s| s.tier_id.clone()).collect());

        if let Some(err) = self.failures.write().await.pop_front() {
            return Err(err);
        }

        Ok(Artifact {
            artifact_ref: format!("memory://{}", ctx.run_id),
            bytes: 0,
            sha256: String::new(),
        })
    }
}

/// Mock implementation of the ClientRegistrar trait.
pub struct ScriptedRegistrar {
    failures: Arc<RwLock<VecDeque<StepError>>>,
    clients: Arc<RwLock<Vec<String>>>,
}

impl Default for ScriptedRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRegistrar {
    pub fn new() -> Self {
        Self {
            failures: Arc::new(RwLock::new(VecDeque::new())),
            clients: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue failures for the next calls.
    pub async fn fail_next(&self, errors: Vec<StepError>) {
        self.failures.write().await.extend(errors);
    }

    /// Client ids seen, one entry per call.
    pub async fn registered(&self) -> Vec<String> {
        self.clients.read().await.clone()
    }
}

#[async_trait]
impl ClientRegistrar for ScriptedRegistrar {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn register(&self, ctx: &RunContext) -> StepOutcome<()> {
        self.clients.write().await.push(ctx.client_id.clone());
        match self.failures.write().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
