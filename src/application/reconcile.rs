use super::planner::BatchPlan;
use crate::domain::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::domain::money::Amount;
use crate::domain::target::SkippedTarget;
use serde::Serialize;
use std::collections::HashSet;

/// Collects audit entries as a run progresses.
#[derive(Debug, Default)]
pub struct AuditRecorder {
    log: AuditLog,
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.log.append(entry);
    }

    pub fn into_log(self) -> AuditLog {
        self.log
    }

    pub fn reconcile(&self, plan: &BatchPlan) -> ReconciliationReport {
        reconcile(plan, &self.log)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub subject_id: String,
    pub amount: Amount,
    pub error_kind: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    pub attempts: u32,
}

/// A reversal the ledger accepted but has not settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingItem {
    pub subject_id: String,
    pub amount: Amount,
    pub record_id: String,
}

/// Planned versus applied totals for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub reference: String,
    pub planned_total: Amount,
    /// Sum of succeeded amounts.
    pub actual_total: Amount,
    pub failed_total: Amount,
    /// Accepted but unsettled; counts towards neither side of the match.
    pub pending_total: Amount,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub skipped_count: usize,
    /// `planned_total == actual_total + failed_total`.
    pub matches: bool,
    /// False if any entry used a random key.
    pub replay_protected: bool,
    pub failures: Vec<FailedItem>,
    pub pending: Vec<PendingItem>,
    pub skipped: Vec<SkippedTarget>,
    /// Planned targets with no audit entry.
    pub not_attempted: Vec<String>,
}

impl ReconciliationReport {
    /// True when everything planned was applied.
    pub fn is_clean(&self) -> bool {
        self.matches
            && self.failed_count == 0
            && self.pending_count == 0
            && self.not_attempted.is_empty()
    }
}

/// Compares a plan against what its run recorded.
///
/// A mismatch is logged at `warn` as well as reported.
pub fn reconcile(plan: &BatchPlan, log: &AuditLog) -> ReconciliationReport {
    let planned_total = plan.planned_total();
    let actual_total: Amount = log.succeeded().map(|e| e.amount).sum();
    let failed_total: Amount = log.failed().map(|e| e.amount).sum();
    let pending_total: Amount = log.pending().map(|e| e.amount).sum();

    let mut failures = Vec::new();
    let mut pending = Vec::new();
    for entry in log.entries() {
        match &entry.outcome {
            AuditOutcome::Succeeded { .. } => {}
            AuditOutcome::Pending { record_id } => pending.push(PendingItem {
                subject_id: entry.subject_id.clone(),
                amount: entry.amount,
                record_id: record_id.clone(),
            }),
            AuditOutcome::Failed {
                error_kind,
                reason,
                guidance,
            } => failures.push(FailedItem {
                subject_id: entry.subject_id.clone(),
                amount: entry.amount,
                error_kind: error_kind.clone(),
                reason: reason.clone(),
                guidance: guidance.clone(),
                attempts: entry.attempts,
            }),
        }
    }

    let recorded: HashSet<&str> = log.entries().iter().map(|e| e.subject_id.as_str()).collect();
    let not_attempted: Vec<String> = plan
        .targets()
        .iter()
        .filter(|t| !recorded.contains(t.subject_id.as_str()))
        .map(|t| t.subject_id.clone())
        .collect();

    let matches = planned_total == actual_total + failed_total;
    let report = ReconciliationReport {
        reference: plan.reference().to_string(),
        planned_total,
        actual_total,
        failed_total,
        pending_total,
        succeeded_count: log.succeeded().count(),
        failed_count: failures.len(),
        pending_count: pending.len(),
        skipped_count: plan.skipped().len(),
        matches,
        replay_protected: log.entries().iter().all(|e| e.replay_protected),
        failures,
        pending,
        skipped: plan.skipped().to_vec(),
        not_attempted,
    };

    if !report.matches {
        tracing::warn!(
            reference = %report.reference,
            planned_total = %report.planned_total,
            actual_total = %report.actual_total,
            failed_total = %report.failed_total,
            pending_total = %report.pending_total,
            not_attempted = report.not_attempted.len(),
            "Reconciliation mismatch; manual reconciliation required"
        );
    } else if report.failed_count > 0 {
        tracing::warn!(
            reference = %report.reference,
            failed = report.failed_count,
            failed_total = %report.failed_total,
            "Batch reconciled with failures"
        );
    } else {
        tracing::info!(
            reference = %report.reference,
            actual_total = %report.actual_total,
            succeeded = report.succeeded_count,
            "Batch reconciled"
        );
    }

    report
}
