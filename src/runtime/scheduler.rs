//! Background tasks driving the reconciler
//!
//! The reconciler itself never decides when to run or whether to retry;
//! this module owns both. One pass picks up due batches, fetches a proposal
//! for each, applies it and records failures with a retry time.
//!
//! Passes must not overlap for the same batches: run a single reconcile
//! task per database.

use super::backoff::RetryBackoff;
use super::proposal_source::{ProposalRequest, ProposalSource, ProposalSourceError};
use crate::threads::{ReconcileError, ReconcileOutcome, ThreadReconciler};
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub applied: usize,
    pub finalized: usize,
    /// No proposal available yet
    pub skipped: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self == &PassReport::default()
    }
}

enum BatchAttempt {
    Done(ReconcileOutcome),
    NotReady,
    Failed { message: String, retryable: bool },
}

async fn attempt_batch(
    reconciler: &ThreadReconciler,
    source: &dyn ProposalSource,
    batch_id: &str,
) -> BatchAttempt {
    let progress = match reconciler.store().batch_progress(batch_id) {
        Ok(progress) => progress,
        Err(e) => return failed(e),
    };
    if progress.is_fully_assigned() {
        // Crashed after assignment; no need to ask for a new proposal
        return match reconciler.finalize_batch(batch_id) {
            Ok(result) => BatchAttempt::Done(result.outcome),
            Err(e) => failed(e),
        };
    }

    let request = match ProposalRequest::load(reconciler.store(), batch_id) {
        Ok(request) => request,
        Err(e) => return failed(e),
    };
    let raw = match source.fetch_proposal(&request).await {
        Ok(raw) => raw,
        Err(ProposalSourceError::NotReady(_)) => return BatchAttempt::NotReady,
        Err(e) => {
            return BatchAttempt::Failed {
                message: e.to_string(),
                retryable: true,
            }
        }
    };

    match reconciler.reconcile_batch_json(batch_id, &raw) {
        Ok(result) => BatchAttempt::Done(result.outcome),
        Err(e) => failed(e),
    }
}

/// Persist a failed attempt; returns the prior attempt count and the retry time.
fn record_failure(
    reconciler: &ThreadReconciler,
    backoff: &RetryBackoff,
    batch_id: &str,
    message: &str,
    retryable: bool,
    now: i64,
) -> Result<(u32, Option<i64>), ReconcileError> {
    let attempts = reconciler
        .store()
        .get_batch(batch_id)?
        .map(|b| b.attempts)
        .unwrap_or(0);
    let prior = u32::try_from(attempts).unwrap_or(u32::MAX);
    let next_retry_at = backoff.next_retry_at(prior, retryable, now);

    reconciler
        .store()
        .record_batch_failure(batch_id, message, next_retry_at, now)?;

    Ok((prior, next_retry_at))
}

fn failed(e: ReconcileError) -> BatchAttempt {
    BatchAttempt::Failed {
        message: format!("{}: {}", e.kind().as_str(), e),
        retryable: e.is_retryable(),
    }
}

/// Run one reconciliation pass over up to `batch_limit` due batches.
pub async fn run_reconcile_pass(
    reconciler: &ThreadReconciler,
    source: &dyn ProposalSource,
    backoff: &RetryBackoff,
    batch_limit: usize,
) -> Result<PassReport, ReconcileError> {
    let now = reconciler.now();
    let batch_ids = reconciler.store().due_batches(now, batch_limit)?;
    let mut report = PassReport::default();

    for batch_id in &batch_ids {
        match attempt_batch(reconciler, source, batch_id).await {
            BatchAttempt::Done(ReconcileOutcome::Applied) => report.applied += 1,
            BatchAttempt::Done(ReconcileOutcome::Finalized) => report.finalized += 1,
            BatchAttempt::NotReady => {
                log::debug!("⏳ No proposal yet for batch {}", batch_id);
                report.skipped += 1;
            }
            BatchAttempt::Failed { message, retryable } => {
                report.failed += 1;
                match record_failure(reconciler, backoff, batch_id, &message, retryable, now) {
                    Ok((prior, Some(at))) => log::warn!(
                        "⚠️  Batch {} failed (attempt {}), retry in {}ms: {}",
                        batch_id,
                        prior + 1,
                        at - now,
                        message
                    ),
                    Ok((prior, None)) => log::error!(
                        "❌ Batch {} failed (attempt {}), parked: {}",
                        batch_id,
                        prior + 1,
                        message
                    ),
                    Err(e) => log::error!(
                        "❌ Batch {} failed and the failure could not be recorded: {} ({})",
                        batch_id,
                        message,
                        e
                    ),
                }
            }
        }
    }

    Ok(report)
}

/// Reconcile scheduler task - periodically apply proposals to due batches
///
/// Arguments:
/// - `reconciler`: Shared reconciler
/// - `source`: Proposal source (inference call stand-in)
/// - `backoff`: Retry policy for failed batches
/// - `batch_limit`: Max batches per pass
/// - `poll_interval_ms`: Pass interval in milliseconds
///
/// This function runs indefinitely until cancelled.
pub async fn reconcile_scheduler_task(
    reconciler: Arc<ThreadReconciler>,
    source: Arc<dyn ProposalSource>,
    backoff: RetryBackoff,
    batch_limit: usize,
    poll_interval_ms: u64,
) {
    log::info!("⏰ Starting reconcile scheduler (interval: {}ms)", poll_interval_ms);

    let mut timer = interval(Duration::from_millis(poll_interval_ms));

    loop {
        timer.tick().await;

        match run_reconcile_pass(&reconciler, source.as_ref(), &backoff, batch_limit).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => {
                log::info!(
                    "📊 Reconcile pass: {} applied, {} finalized, {} waiting, {} failed",
                    report.applied,
                    report.finalized,
                    report.skipped,
                    report.failed
                );
            }
            Err(e) => {
                log::error!("❌ Reconcile pass failed: {}", e);
            }
        }
    }
}

/// Sweep scheduler task - periodically mark idle threads inactive
///
/// This function runs indefinitely until cancelled.
pub async fn sweep_scheduler_task(reconciler: Arc<ThreadReconciler>, sweep_interval_ms: u64) {
    log::info!("💤 Starting inactivity sweep (interval: {}ms)", sweep_interval_ms);

    let mut timer = interval(Duration::from_millis(sweep_interval_ms));

    loop {
        timer.tick().await;

        if let Err(e) = reconciler.sweep_inactive() {
            log::error!("❌ Inactivity sweep failed: {}", e);
        }
    }
}
