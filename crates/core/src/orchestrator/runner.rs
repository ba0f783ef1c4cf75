//! Run orchestrator implementation.
//!
//! Drives one run through its phases:
//! - Initializing: client registration
//! - SelectingTier / ExecutingTier / RecordingStatus / Publishing / Deciding: the tier loop
//! - Finalizing: artifact assembly
//!
//! Tier N+1 is never dispatched before tier N's status is recorded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{DomainEvent, EventEmitter, NotifyError};
use crate::finalizer::Finalizer;
use crate::identity::{ClientRegistrar, NoopRegistrar};
use crate::invoker::TaskInvoker;
use crate::metrics::{NOTIFY_FAILURES, RUNS_ACTIVE, RUNS_FINISHED, RUNS_STARTED};
use crate::progress::{ProgressPublisher, ProgressUpdate};
use crate::retry::{RetryExecutor, RetryPolicies};
use crate::run::{Artifact, RunContext, RunOutcome, RunPhase, Tier, TierAggregate, TierStatus};
use crate::sequencer::TierSequencer;
use crate::status::{StatusError, StatusStore};
use crate::step::{FailureClass, StepError};

use super::config::{OrchestratorConfig, TierFailurePolicy};
use super::fanout::FanOutExecutor;
use super::types::{Decision, PhaseTransition, RunReport};

/// The continuation rule evaluated in `Deciding`.
///
/// A failed tier ends the loop under [`TierFailurePolicy::Stop`]. Otherwise
/// the loop continues while the sequencer reports more tiers.
pub fn decide(
    more_remaining: bool,
    aggregate: &TierAggregate,
    policy: TierFailurePolicy,
) -> Decision {
    if !aggregate.is_success() && policy == TierFailurePolicy::Stop {
        return Decision::Finalize;
    }
    if more_remaining {
        Decision::Continue
    } else {
        Decision::Finalize
    }
}

/// Mutable state of one execution. Owned by the task driving the run.
struct RunState {
    ctx: RunContext,
    phase: RunPhase,
    transitions: Vec<PhaseTransition>,
    history: Vec<TierStatus>,
    failed_tiers: Vec<String>,
    current_tier: Option<String>,
}

impl RunState {
    fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            phase: RunPhase::Initializing,
            transitions: Vec::new(),
            history: Vec::new(),
            failed_tiers: Vec::new(),
            current_tier: None,
        }
    }

    fn failed(&self, class: FailureClass, reason: impl Into<String>) -> RunOutcome {
        RunOutcome::Failed {
            class,
            reason: reason.into(),
            tier_id: self.current_tier.clone(),
        }
    }

    fn cancelled(&self) -> RunOutcome {
        RunOutcome::Cancelled {
            last_recorded_tier: self.ctx.cursor.clone(),
        }
    }

    /// Run outcome for a required step that gave up.
    fn step_failed(&self, step: &str, err: StepError) -> RunOutcome {
        if err.is_cancelled() {
            return self.cancelled();
        }
        self.failed(err.class, format!("{} failed: {}", step, err.message))
    }
}

fn store_error(err: StatusError) -> StepError {
    match err {
        StatusError::DuplicateTier { .. } => StepError::invalid(err.to_string()),
        StatusError::Serialization(_) => StepError::permanent(err.to_string()),
        _ => StepError::unavailable(err.to_string()),
    }
}

/// Top-level controller of a run.
pub struct RunOrchestrator {
    config: OrchestratorConfig,
    policies: RetryPolicies,
    sequencer: Arc<dyn TierSequencer>,
    invoker: Arc<dyn TaskInvoker>,
    finalizer: Arc<dyn Finalizer>,
    registrar: Arc<dyn ClientRegistrar>,
    status_store: Arc<dyn StatusStore>,
    events: Arc<dyn EventEmitter>,
    progress: Option<Arc<dyn ProgressPublisher>>,
    retry: RetryExecutor,
}

impl RunOrchestrator {
    /// Create a new orchestrator. Registration defaults to a no-op and
    /// progress updates are not published until a publisher is attached.
    pub fn new(
        config: OrchestratorConfig,
        policies: RetryPolicies,
        sequencer: Arc<dyn TierSequencer>,
        invoker: Arc<dyn TaskInvoker>,
        finalizer: Arc<dyn Finalizer>,
        status_store: Arc<dyn StatusStore>,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            config,
            policies,
            sequencer,
            invoker,
            finalizer,
            registrar: Arc::new(NoopRegistrar),
            status_store,
            events,
            progress: None,
            retry: RetryExecutor::new(),
        }
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn ClientRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressPublisher>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Replaces the retry executor, e.g. to attach a different observer.
    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.status_store
    }

    /// Drive a run to a terminal phase.
    ///
    /// The run record must already exist in the status store.
    pub async fn execute(&self, ctx: RunContext, cancel: CancellationToken) -> RunReport {
        RUNS_STARTED.inc();
        RUNS_ACTIVE.inc();

        let mut state = RunState::new(ctx);
        info!(
            run_id = %state.ctx.run_id,
            client_id = %state.ctx.client_id,
            "Run started"
        );
        self.emit(DomainEvent::RunStarted {
            run_id: state.ctx.run_id.clone(),
            client_id: state.ctx.client_id.clone(),
        })
        .await;

        let outcome = match self.drive(&mut state, &cancel).await {
            Ok(artifact) => RunOutcome::Completed {
                artifact,
                failed_tiers: state.failed_tiers.clone(),
            },
            Err(outcome) => outcome,
        };

        self.finish(state, outcome).await
    }

    /// The state machine proper. `Err` carries a failed or cancelled outcome.
    async fn drive(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Artifact, RunOutcome> {
        let retry = self.retry.clone().with_cancellation(cancel.clone());

        // Initializing
        let registered = retry
            .execute("registration", &self.policies.registration, || {
                self.registrar.register(&state.ctx)
            })
            .await;
        if let Err(e) = registered {
            return Err(state.step_failed("registration", e));
        }

        let fanout = FanOutExecutor::new(
            Arc::clone(&self.invoker),
            self.config.max_concurrent_items,
            self.retry.clone(),
            cancel.clone(),
        );

        self.enter(state, RunPhase::SelectingTier)?;

        loop {
            state.current_tier = None;
            if cancel.is_cancelled() {
                return Err(state.cancelled());
            }

            let next = retry
                .execute("sequencer", &self.policies.sequencer, || {
                    self.sequencer.next(&state.ctx)
                })
                .await;
            let tier = match next {
                Ok(Some(tier)) if !tier.items.is_empty() => tier,
                Ok(Some(tier)) => {
                    debug!(run_id = %state.ctx.run_id, tier_id = %tier.id, "Empty tier, treating as end of plan");
                    break;
                }
                Ok(None) => break,
                Err(e) => return Err(state.step_failed("sequencer", e)),
            };

            state.current_tier = Some(tier.id.clone());
            if state.history.iter().any(|s| s.tier_id == tier.id) {
                return Err(state.failed(
                    FailureClass::Invalid,
                    format!("sequencer returned already recorded tier {}", tier.id),
                ));
            }

            self.enter(state, RunPhase::ExecutingTier)?;
            let sequence = state.ctx.tiers_recorded + 1;
            let status = fanout
                .run(&state.ctx, &tier, &self.policies.items, sequence)
                .await;

            self.enter(state, RunPhase::RecordingStatus)?;
            self.record(state, &status).await?;

            self.enter(state, RunPhase::Publishing)?;
            self.publish(state, &tier, &status).await;

            self.enter(state, RunPhase::Deciding)?;
            if !status.is_success() {
                state.failed_tiers.push(tier.id.clone());
            }
            if cancel.is_cancelled() {
                return Err(state.cancelled());
            }

            match decide(
                tier.more_remaining,
                &status.aggregate,
                self.config.tier_failure_policy,
            ) {
                Decision::Continue => self.enter(state, RunPhase::SelectingTier)?,
                Decision::Finalize => break,
            }
        }

        state.current_tier = None;
        self.enter(state, RunPhase::Finalizing)?;

        let finalized = retry
            .execute("finalizer", &self.policies.finalizer, || {
                self.finalizer.finalize(&state.ctx, &state.history)
            })
            .await;
        finalized.map_err(|e| state.step_failed("finalizer", e))
    }

    /// Appends the tier status and advances the cursor.
    ///
    /// Not cancellable: a tier that ran is always recorded.
    async fn record(&self, state: &mut RunState, status: &TierStatus) -> Result<(), RunOutcome> {
        let run_id = state.ctx.run_id.clone();
        let recorded = self
            .retry
            .execute("status", &self.policies.status, || {
                futures::future::ready(
                    self.status_store
                        .record_tier(&run_id, status)
                        .map_err(store_error),
                )
            })
            .await;
        if let Err(e) = recorded {
            return Err(state.step_failed("status", e));
        }

        state.ctx.advance(&status.tier_id);
        state.history.push(status.clone());
        Ok(())
    }

    /// Best-effort progress push and tier event.
    async fn publish(&self, state: &RunState, tier: &Tier, status: &TierStatus) {
        if let Some(progress) = &self.progress {
            let already_done = tier.position.map_or(0, |p| p.done);
            let succeeded = state.history.iter().filter(|s| s.is_success()).count();
            let tiers_completed = (already_done + succeeded) as u32;
            let total_tiers = tier.position.map(|p| p.total as u32);
            let update = ProgressUpdate {
                run_id: state.ctx.run_id.clone(),
                tier_id: tier.id.clone(),
                fraction_complete: ProgressUpdate::compute_fraction(
                    tiers_completed,
                    total_tiers,
                    tier.more_remaining,
                ),
                tiers_completed,
                total_tiers,
            };
            self.best_effort("progress", progress.push(update)).await;
        }

        self.emit(DomainEvent::TierCompleted {
            run_id: state.ctx.run_id.clone(),
            tier_id: tier.id.clone(),
            aggregate: status.aggregate.clone(),
        })
        .await;
    }

    async fn emit(&self, event: DomainEvent) {
        self.best_effort("event", self.events.publish(event)).await;
    }

    /// Awaits a notification for at most `notify_timeout_ms`. Never fails.
    async fn best_effort<F>(&self, channel: &str, fut: F)
    where
        F: Future<Output = Result<(), NotifyError>>,
    {
        let limit = Duration::from_millis(self.config.notify_timeout_ms);
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(channel, "Notification failed: {}", e);
                NOTIFY_FAILURES.with_label_values(&[channel, "error"]).inc();
            }
            Err(_) => {
                warn!(channel, "Notification timed out after {:?}", limit);
                NOTIFY_FAILURES.with_label_values(&[channel, "timeout"]).inc();
            }
        }
    }

    /// Moves to `next`, persisting the phase on a best-effort basis.
    fn enter(&self, state: &mut RunState, next: RunPhase) -> Result<(), RunOutcome> {
        if !state.phase.can_transition_to(next) {
            error!(
                run_id = %state.ctx.run_id,
                "Illegal phase transition {} -> {}",
                state.phase,
                next
            );
            return Err(state.failed(
                FailureClass::Invalid,
                format!("illegal phase transition {} -> {}", state.phase, next),
            ));
        }

        debug!(run_id = %state.ctx.run_id, "Phase {} -> {}", state.phase, next);
        state.transitions.push(PhaseTransition {
            from: state.phase,
            to: next,
            at: Utc::now(),
        });
        state.phase = next;

        if let Err(e) =
            self.status_store
                .update_phase(&state.ctx.run_id, next, state.ctx.cursor.as_deref())
        {
            warn!(run_id = %state.ctx.run_id, "Failed to persist phase {}: {}", next, e);
        }
        Ok(())
    }

    async fn finish(&self, mut state: RunState, outcome: RunOutcome) -> RunReport {
        let terminal = outcome.phase();
        if state.phase.can_transition_to(terminal) {
            state.transitions.push(PhaseTransition {
                from: state.phase,
                to: terminal,
                at: Utc::now(),
            });
            state.phase = terminal;
        } else {
            error!(
                run_id = %state.ctx.run_id,
                "Cannot move from {} to {}",
                state.phase,
                terminal
            );
        }
        state.ctx.terminal = true;

        if let Err(e) = self.status_store.finish_run(&state.ctx.run_id, &outcome) {
            warn!(run_id = %state.ctx.run_id, "Failed to persist run outcome: {}", e);
        }

        let run_id = state.ctx.run_id.clone();
        let event = match &outcome {
            RunOutcome::Completed {
                artifact,
                failed_tiers,
            } => {
                info!(
                    run_id = %run_id,
                    "Run completed: {} ({} tiers, {} failed)",
                    artifact.artifact_ref,
                    state.history.len(),
                    failed_tiers.len()
                );
                DomainEvent::RunCompleted {
                    run_id: run_id.clone(),
                    artifact_ref: artifact.artifact_ref.clone(),
                }
            }
            RunOutcome::Failed {
                class,
                reason,
                tier_id,
            } => {
                error!(run_id = %run_id, class = %class, tier_id = ?tier_id, "Run failed: {}", reason);
                DomainEvent::RunFailed {
                    run_id: run_id.clone(),
                    reason: reason.clone(),
                    class: *class,
                    tier_id: tier_id.clone(),
                }
            }
            RunOutcome::Cancelled { last_recorded_tier } => {
                info!(run_id = %run_id, last_recorded_tier = ?last_recorded_tier, "Run cancelled");
                DomainEvent::RunCancelled {
                    run_id: run_id.clone(),
                    last_recorded_tier: last_recorded_tier.clone(),
                }
            }
        };
        self.emit(event).await;

        RUNS_FINISHED.with_label_values(&[outcome.label()]).inc();
        RUNS_ACTIVE.dec();

        RunReport {
            run_id,
            outcome,
            history: state.history,
            transitions: state.transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ItemFailure;

    fn failed() -> TierAggregate {
        TierAggregate::Failed {
            failures: vec![ItemFailure {
                item_id: "a".to_string(),
                class: FailureClass::AttemptsExhausted,
            }],
        }
    }

    #[test]
    fn test_decide_continues_while_more_remain() {
        assert_eq!(
            decide(true, &TierAggregate::Success, TierFailurePolicy::Stop),
            Decision::Continue
        );
        assert_eq!(
            decide(false, &TierAggregate::Success, TierFailurePolicy::Stop),
            Decision::Finalize
        );
    }

    #[test]
    fn test_decide_stop_policy_ends_on_failure() {
        assert_eq!(
            decide(true, &failed(), TierFailurePolicy::Stop),
            Decision::Finalize
        );
    }

    #[test]
    fn test_decide_continue_policy_ignores_failure() {
        assert_eq!(
            decide(true, &failed(), TierFailurePolicy::Continue),
            Decision::Continue
        );
        assert_eq!(
            decide(false, &failed(), TierFailurePolicy::Continue),
            Decision::Finalize
        );
    }

    #[test]
    fn test_store_error_classes() {
        let dup = StatusError::DuplicateTier {
            run_id: "r".to_string(),
            tier_id: "t".to_string(),
        };
        assert_eq!(store_error(dup).class, FailureClass::Invalid);
        assert_eq!(
            store_error(StatusError::Database("locked".to_string())).class,
            FailureClass::Unavailable
        );
    }
}
