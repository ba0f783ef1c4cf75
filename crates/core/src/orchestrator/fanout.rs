//! Bounded fan-out of a tier's work items with a full-barrier fan-in.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::invoker::TaskInvoker;
use crate::metrics::{ITEMS_IN_FLIGHT, ITEM_RESULTS, TIERS_TOTAL, TIER_DURATION};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::run::{ItemOutcome, ItemResult, RunContext, Tier, TierStatus};
use crate::step::StepError;

const ITEM_STEP: &str = "item";

/// Keeps the in-flight gauge honest even if the item task panics.
struct InFlightGuard;

impl InFlightGuard {
    fn enter() -> Self {
        ITEMS_IN_FLIGHT.inc();
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        ITEMS_IN_FLIGHT.dec();
    }
}

/// Runs every work item of a tier concurrently, each under its own retry
/// loop, and waits for all of them before aggregating.
///
/// One executor belongs to one run. Its semaphore is the only state shared
/// between item tasks.
pub struct FanOutExecutor {
    invoker: Arc<dyn TaskInvoker>,
    retry: RetryExecutor,
    limit: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl FanOutExecutor {
    /// `max_in_flight` is clamped to at least one slot.
    pub fn new(
        invoker: Arc<dyn TaskInvoker>,
        max_in_flight: usize,
        retry: RetryExecutor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            invoker,
            retry: retry.with_cancellation(cancel.clone()),
            limit: Arc::new(Semaphore::new(max_in_flight.max(1))),
            cancel,
        }
    }

    /// Free slots right now.
    pub fn available_slots(&self) -> usize {
        self.limit.available_permits()
    }

    /// Dispatches `tier.items` and returns once every dispatched item has a
    /// terminal outcome.
    ///
    /// After cancellation no further item is dispatched and no new retry
    /// starts. Undispatched items are listed in `TierStatus::skipped`.
    pub async fn run(
        &self,
        ctx: &RunContext,
        tier: &Tier,
        policy: &RetryPolicy,
        sequence: u32,
    ) -> TierStatus {
        let started = Instant::now();
        let shared_ctx = Arc::new(ctx.clone());
        let policy = Arc::new(policy.clone());

        let mut handles: Vec<(String, JoinHandle<ItemOutcome>)> =
            Vec::with_capacity(tier.items.len());
        let mut skipped = Vec::new();

        for (index, item) in tier.items.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&self.limit).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                skipped.extend(tier.items[index..].iter().map(|i| i.id.clone()));
                break;
            };

            let invoker = Arc::clone(&self.invoker);
            let retry = self.retry.clone();
            let ctx = Arc::clone(&shared_ctx);
            let policy = Arc::clone(&policy);
            let tier_id = tier.id.clone();
            let item = item.clone();
            let item_id = item.id.clone();

            debug!(run_id = %ctx.run_id, tier_id = %tier_id, item_id = %item.id, "Dispatching item");

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _guard = InFlightGuard::enter();
                let attempts = AtomicU32::new(0);

                let result = retry
                    .execute(ITEM_STEP, &policy, || {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        invoker.invoke(&ctx, &tier_id, &item)
                    })
                    .await;

                let result = match result {
                    Ok(output) => {
                        ITEM_RESULTS.with_label_values(&["success"]).inc();
                        ItemResult::Succeeded { output }
                    }
                    Err(error) => {
                        ITEM_RESULTS.with_label_values(&[error.class.as_str()]).inc();
                        ItemResult::Failed { error }
                    }
                };

                ItemOutcome {
                    item_id: item.id.clone(),
                    attempts: attempts.load(Ordering::Relaxed),
                    result,
                }
            });
            handles.push((item_id, handle));
        }

        // Full barrier: every dispatched item reaches a terminal outcome.
        let mut outcomes = Vec::with_capacity(handles.len());
        for (item_id, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(run_id = %ctx.run_id, tier_id = %tier.id, item_id = %item_id, "Item task aborted: {}", e);
                    ITEM_RESULTS.with_label_values(&["panicked"]).inc();
                    outcomes.push(ItemOutcome {
                        item_id,
                        attempts: 0,
                        result: ItemResult::Failed {
                            error: StepError::permanent(format!("item task aborted: {}", e)),
                        },
                    });
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let status = TierStatus::from_outcomes(&tier.id, sequence, outcomes, skipped, cancelled);

        let label = status.label();
        TIERS_TOTAL.with_label_values(&[label]).inc();
        TIER_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());

        info!(
            run_id = %ctx.run_id,
            tier_id = %tier.id,
            "Tier {} finished: {} ({}/{} items succeeded, {} skipped)",
            tier.id,
            label,
            status.succeeded(),
            tier.items.len(),
            status.skipped.len()
        );

        status
    }
}
