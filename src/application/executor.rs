use super::planner::BatchPlan;
use super::reconcile::{AuditRecorder, ReconciliationReport, reconcile};
use super::retry::{BackoffRetrier, RetryPolicy};
use super::submitter::IdempotentSubmitter;
use crate::config::BatchConfig;
use crate::domain::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::domain::key::KeyDeriver;
use crate::domain::operation::{ActionKind, EffectStatus, LogicalOperation, OperationIdentity};
use crate::domain::ports::LedgerClientRef;
use crate::domain::target::{EligibleTarget, RefundReason};
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag, checked between submissions.
///
/// Stopping also wakes a run that is sitting in a chunk pause.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<StopState>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.stopped.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        loop {
            // Register before checking so a concurrent `stop` is not missed.
            let notified = self.0.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// What a run did with its plan.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub plan: BatchPlan,
    pub log: AuditLog,
    /// Targets never submitted because the run was stopped.
    pub not_attempted: Vec<String>,
}

impl ExecutionOutcome {
    pub fn was_stopped(&self) -> bool {
        !self.not_attempted.is_empty()
    }

    pub fn report(&self) -> ReconciliationReport {
        reconcile(&self.plan, &self.log)
    }

    /// False if any submission used a random key, so repeating this run
    /// could apply the same reversal twice.
    pub fn replay_protected(&self) -> bool {
        self.log.entries().iter().all(|e| e.replay_protected)
    }
}

/// Applies a [`BatchPlan`] one target at a time.
///
/// A failed target is recorded and the run moves on; it never aborts the
/// batch.
pub struct BatchExecutor {
    retrier: BackoffRetrier,
    deriver: KeyDeriver,
    chunk_size: usize,
    chunk_pause: Duration,
    reason: RefundReason,
    stop: StopSignal,
}

impl BatchExecutor {
    pub fn new(retrier: BackoffRetrier, deriver: KeyDeriver) -> Self {
        Self {
            retrier,
            deriver,
            chunk_size: 20,
            chunk_pause: Duration::from_secs(1),
            reason: RefundReason::default(),
            stop: StopSignal::new(),
        }
    }

    /// Wires submitter, retrier and key deriver from one config.
    pub fn from_config(ledger: LedgerClientRef, config: &BatchConfig) -> Result<Self> {
        config.validate()?;
        let submitter = IdempotentSubmitter::new(ledger, config.request_timeout());
        let policy =
            RetryPolicy::new(config.max_attempts, config.base_delay()).max_delay(config.max_delay());
        let deriver = KeyDeriver::new(config.key_mode, config.key_length)?;
        Ok(Self::new(BackoffRetrier::new(submitter, policy), deriver)
            .with_chunking(config.chunk_size, config.chunk_pause()))
    }

    #[must_use]
    pub fn with_chunking(mut self, chunk_size: usize, chunk_pause: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_pause = chunk_pause;
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: RefundReason) -> Self {
        self.reason = reason;
        self
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Consumes the plan, so it can only be run once.
    pub async fn execute(&self, plan: BatchPlan) -> ExecutionOutcome {
        let total = plan.targets().len();
        tracing::info!(
            reference = plan.reference(),
            targets = total,
            planned_total = %plan.planned_total(),
            "Starting batch"
        );

        let mut recorder = AuditRecorder::new();
        let mut not_attempted = Vec::new();

        for (index, target) in plan.targets().iter().enumerate() {
            if index > 0 && index % self.chunk_size == 0 && !self.chunk_pause.is_zero() {
                tracing::debug!(pause_ms = self.chunk_pause.as_millis() as u64, "Chunk pause");
                tokio::select! {
                    _ = tokio::time::sleep(self.chunk_pause) => {}
                    _ = self.stop.stopped() => {}
                }
            }

            // Checked after the pause so a stop raised while paused takes effect.
            if self.stop.is_stopped() {
                not_attempted.extend(plan.targets()[index..].iter().map(|t| t.subject_id.clone()));
                tracing::warn!(
                    reference = plan.reference(),
                    not_attempted = not_attempted.len(),
                    "Batch stopped before completion"
                );
                break;
            }

            let entry = self.submit_target(plan.reference(), target).await;
            match &entry.outcome {
                AuditOutcome::Succeeded { record_id } => tracing::info!(
                    progress = %format!("{}/{}", index + 1, total),
                    subject_id = %entry.subject_id,
                    amount = %entry.amount,
                    record_id = %record_id,
                    attempts = entry.attempts,
                    "Reversal applied"
                ),
                AuditOutcome::Pending { record_id } => tracing::warn!(
                    progress = %format!("{}/{}", index + 1, total),
                    subject_id = %entry.subject_id,
                    amount = %entry.amount,
                    record_id = %record_id,
                    attempts = entry.attempts,
                    "Reversal accepted but pending"
                ),
                AuditOutcome::Failed { error_kind, reason, .. } => tracing::error!(
                    progress = %format!("{}/{}", index + 1, total),
                    subject_id = %entry.subject_id,
                    amount = %entry.amount,
                    error_kind = %error_kind,
                    reason = %reason,
                    attempts = entry.attempts,
                    "Reversal failed"
                ),
            }
            recorder.record(entry);
        }

        ExecutionOutcome {
            plan,
            log: recorder.into_log(),
            not_attempted,
        }
    }

    async fn submit_target(&self, reference: &str, target: &EligibleTarget) -> AuditEntry {
        let timestamp = Utc::now();
        // Reference and subject were both checked non-blank during planning.
        let identity = OperationIdentity {
            actor_id: reference.to_string(),
            subject_id: target.subject_id.clone(),
            action: ActionKind::Refund,
        };
        let issued = self.deriver.issue(&identity);

        let operation = LogicalOperation::new(
            identity,
            target.remaining_amount,
            target.currency.clone(),
        )
        .with_metadata("batch_reference", reference)
        .with_metadata("refund_type", target.kind.as_str())
        .with_metadata("reason", self.reason.as_str());

        let submission = self.retrier.retryable_submit(&operation, &issued.key).await;
        let attempts = submission.attempt_count();
        let outcome = match submission.result {
            Ok(record) => match record.status {
                EffectStatus::Succeeded => AuditOutcome::Succeeded {
                    record_id: record.id,
                },
                EffectStatus::Pending => AuditOutcome::Pending {
                    record_id: record.id,
                },
                EffectStatus::Failed => AuditOutcome::Failed {
                    error_kind: "permanent".to_string(),
                    reason: format!("ledger reported reversal {} as failed", record.id),
                    guidance: None,
                },
            },
            Err(error) => AuditOutcome::Failed {
                error_kind: error.kind().to_string(),
                reason: error.to_string(),
                guidance: error.guidance().map(str::to_string),
            },
        };

        AuditEntry {
            subject_id: target.subject_id.clone(),
            key: issued.key,
            amount: target.remaining_amount,
            outcome,
            attempts,
            elapsed: submission.elapsed,
            timestamp,
            replay_protected: issued.replay_protected,
        }
    }
}
