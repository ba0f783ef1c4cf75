//! Run submission and lifecycle management.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::run::{RunContext, RunOutcome, RunSeed, TierStatus};
use crate::status::{RunFilter, RunRecord, StatusStore};
use crate::step::FailureClass;

use super::runner::RunOrchestrator;
use super::types::{RunError, RunReport};

/// A run executing (or queued) in this process.
struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<Option<RunReport>>,
}

/// Accepts run seeds and executes each run on its own task.
pub struct RunService {
    orchestrator: Arc<RunOrchestrator>,
    status_store: Arc<dyn StatusStore>,
    run_slots: Option<Arc<Semaphore>>,
    active: Arc<RwLock<HashMap<String, ActiveRun>>>,
    shutdown: CancellationToken,
}

impl RunService {
    /// `max_concurrent_runs = 0` means unlimited.
    pub fn new(orchestrator: Arc<RunOrchestrator>, max_concurrent_runs: usize) -> Self {
        let status_store = Arc::clone(orchestrator.status_store());
        let run_slots = (max_concurrent_runs > 0).then(|| Arc::new(Semaphore::new(max_concurrent_runs)));

        Self {
            orchestrator,
            status_store,
            run_slots,
            active: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Validate the seed, persist the run and start executing it.
    pub async fn start(&self, seed: RunSeed) -> Result<String, RunError> {
        if self.shutdown.is_cancelled() {
            return Err(RunError::ShuttingDown);
        }
        seed.validate().map_err(RunError::InvalidSeed)?;

        let run_id = Uuid::new_v4().to_string();
        let ctx = RunContext::new(&run_id, seed);
        self.status_store.create_run(&ctx)?;

        let cancel = self.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        self.active.write().await.insert(
            run_id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let status_store = Arc::clone(&self.status_store);
        let active = Arc::clone(&self.active);
        let run_slots = self.run_slots.clone();
        let task_run_id = run_id.clone();

        tokio::spawn(async move {
            // Queued runs stay in Initializing until a slot frees.
            let _slot = match run_slots {
                Some(slots) => tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = slots.acquire_owned() => permit.ok(),
                },
                None => None,
            };

            // Joined on its own task so a panic still releases the run.
            let execution = tokio::spawn(async move { orchestrator.execute(ctx, cancel).await });
            let report = match execution.await {
                Ok(report) => report,
                Err(e) => aborted_report(status_store.as_ref(), &task_run_id, &e.to_string()),
            };
            active.write().await.remove(&task_run_id);
            let _ = done_tx.send(Some(report));
        });

        info!(run_id = %run_id, "Run submitted");
        Ok(run_id)
    }

    /// Request cancellation. In-flight attempts finish before the run ends.
    pub async fn cancel(&self, run_id: &str) -> Result<(), RunError> {
        if let Some(run) = self.active.read().await.get(run_id) {
            info!(run_id, "Cancelling run");
            run.cancel.cancel();
            return Ok(());
        }

        let record = self
            .status_store
            .get_run(run_id)?
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;

        if record.phase.is_terminal() {
            return Err(RunError::AlreadyTerminal {
                run_id: run_id.to_string(),
                phase: record.phase,
            });
        }

        // Not executing here (e.g. left over from a previous process).
        warn!(run_id, "Run {} is not active, marking cancelled", run_id);
        self.status_store.finish_run(
            run_id,
            &RunOutcome::Cancelled {
                last_recorded_tier: record.cursor,
            },
        )?;
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> Result<Option<RunRecord>, RunError> {
        Ok(self.status_store.get_run(run_id)?)
    }

    pub fn list(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, RunError> {
        Ok(self.status_store.list_runs(filter)?)
    }

    pub fn count(&self, filter: &RunFilter) -> Result<i64, RunError> {
        Ok(self.status_store.count_runs(filter)?)
    }

    pub fn history(&self, run_id: &str) -> Result<Vec<TierStatus>, RunError> {
        Ok(self.status_store.tier_history(run_id)?)
    }

    /// Wait for an active run to reach a terminal phase.
    ///
    /// Runs that already finished are no longer tracked; their outcome is
    /// available through [`RunService::get`].
    pub async fn wait(&self, run_id: &str) -> Result<RunReport, RunError> {
        let done = self.active.read().await.get(run_id).map(|r| r.done.clone());

        let Some(mut done) = done else {
            return match self.status_store.get_run(run_id)? {
                Some(record) => Err(RunError::AlreadyTerminal {
                    run_id: run_id.to_string(),
                    phase: record.phase,
                }),
                None => Err(RunError::NotFound(run_id.to_string())),
            };
        };

        let report = done
            .wait_for(|r| r.is_some())
            .await
            .map_err(|_| RunError::NotFound(run_id.to_string()))?;
        report
            .clone()
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))
    }

    /// Runs currently tracked (executing or queued).
    pub async fn active_runs(&self) -> usize {
        self.active.read().await.len()
    }

    /// Stop accepting runs, cancel every active run and wait for them to end.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let pending: Vec<_> = self
            .active
            .read()
            .await
            .values()
            .map(|r| r.done.clone())
            .collect();
        info!("Shutting down run service, {} active runs", pending.len());

        for mut done in pending {
            if done.wait_for(|r| r.is_some()).await.is_err() {
                debug!("Run task ended without a report");
            }
        }
        info!("Run service stopped");
    }
}

/// Report for a run whose task died before producing one. The failure is
/// persisted so the record does not stay active.
fn aborted_report(status_store: &dyn StatusStore, run_id: &str, reason: &str) -> RunReport {
    error!(run_id, "Run task aborted: {}", reason);
    let outcome = RunOutcome::Failed {
        class: FailureClass::Permanent,
        reason: format!("run task aborted: {}", reason),
        tier_id: None,
    };
    if let Err(e) = status_store.finish_run(run_id, &outcome) {
        warn!(run_id, "Failed to persist aborted run: {}", e);
    }
    let history = status_store.tier_history(run_id).unwrap_or_default();

    RunReport {
        run_id: run_id.to_string(),
        outcome,
        history,
        transitions: Vec::new(),
    }
}
