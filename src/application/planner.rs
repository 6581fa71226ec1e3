use crate::domain::money::{Amount, Currency};
use crate::domain::ports::{LedgerClientRef, LedgerFault, OperationFilter};
use crate::domain::target::{
    EligibleTarget, PriorOperation, PriorStatus, RefundKind, SkipReason, SkippedTarget,
};
use crate::error::{LedgerError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// A frozen snapshot of what a bulk run will do.
///
/// Built once by [`BatchPlanner`]; the same value is previewed and then moved
/// into the executor, so what was shown is what runs.
#[derive(Debug, PartialEq, Serialize)]
pub struct BatchPlan {
    reference: String,
    currency: Option<Currency>,
    targets: Vec<EligibleTarget>,
    skipped: Vec<SkippedTarget>,
}

impl BatchPlan {
    /// The batch reference; used as the actor of every derived key.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn currency(&self) -> Option<&Currency> {
        self.currency.as_ref()
    }

    pub fn targets(&self) -> &[EligibleTarget] {
        &self.targets
    }

    pub fn skipped(&self) -> &[SkippedTarget] {
        &self.skipped
    }

    pub fn planned_total(&self) -> Amount {
        self.targets.iter().map(|t| t.remaining_amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Dry run: summarises the plan without touching anything.
    pub fn preview(&self) -> Preview {
        let mut by_kind: BTreeMap<RefundKind, KindSummary> = BTreeMap::new();
        for target in &self.targets {
            let summary = by_kind.entry(target.kind).or_default();
            summary.count += 1;
            summary.total += target.remaining_amount;
        }
        Preview {
            reference: self.reference.clone(),
            currency: self.currency.clone(),
            count: self.targets.len(),
            total_amount: self.planned_total(),
            by_kind,
            skipped_count: self.skipped.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct KindSummary {
    pub count: usize,
    pub total: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub reference: String,
    pub currency: Option<Currency>,
    pub count: usize,
    pub total_amount: Amount,
    pub by_kind: BTreeMap<RefundKind, KindSummary>,
    pub skipped_count: usize,
}

/// Decides which prior operations are eligible for a bulk reversal.
#[derive(Clone)]
pub struct BatchPlanner {
    ledger: LedgerClientRef,
    reference: String,
    currency: Option<Currency>,
}

impl BatchPlanner {
    pub fn new(ledger: LedgerClientRef, reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "batch reference must not be empty".to_string(),
            ));
        }
        Ok(Self {
            ledger,
            reference,
            currency: None,
        })
    }

    /// Restricts the batch to one currency. Without it, the first eligible
    /// candidate fixes the currency.
    #[must_use]
    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Fetches each candidate's current state and plans over it, in input
    /// order.
    pub async fn plan(&self, candidate_ids: &[String]) -> Result<BatchPlan> {
        let mut snapshots = Vec::with_capacity(candidate_ids.len());
        let mut missing = Vec::new();
        for id in candidate_ids {
            match self.ledger.fetch_operation(id).await {
                Ok(snapshot) => snapshots.push(Ok(snapshot)),
                Err(LedgerFault::NotFound(_)) => {
                    missing.push(id.clone());
                    snapshots.push(Err(id.clone()));
                }
                Err(fault) => return Err(fault.into()),
            }
        }
        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), ids = ?missing, "Candidates not found in ledger");
        }
        Ok(self.build(snapshots))
    }

    /// Lists candidates by filter and plans over them.
    pub async fn discover(&self, filter: &OperationFilter) -> Result<BatchPlan> {
        let snapshots = self.ledger.list_operations(filter).await?;
        tracing::info!(found = snapshots.len(), "Discovered candidate operations");
        Ok(self.build(snapshots.into_iter().map(Ok).collect()))
    }

    /// Plans over snapshots the caller already holds.
    pub fn plan_snapshots(&self, snapshots: Vec<PriorOperation>) -> BatchPlan {
        self.build(snapshots.into_iter().map(Ok).collect())
    }

    fn build(&self, snapshots: Vec<std::result::Result<PriorOperation, String>>) -> BatchPlan {
        let mut currency = self.currency.clone();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        let mut skipped = Vec::new();

        for snapshot in snapshots {
            let prior = match snapshot {
                Ok(prior) => prior,
                Err(id) => {
                    skipped.push(SkippedTarget {
                        subject_id: id,
                        reason: SkipReason::NotFound,
                    });
                    continue;
                }
            };
            if prior.id.trim().is_empty() {
                skipped.push(SkippedTarget {
                    subject_id: prior.id,
                    reason: SkipReason::NotFound,
                });
                continue;
            }
            // Duplicate ids in the input collapse onto the first occurrence.
            if !seen.insert(prior.id.clone()) {
                continue;
            }

            match assess(&prior, currency.as_ref()) {
                Ok(target) => {
                    if currency.is_none() {
                        currency = Some(target.currency.clone());
                    }
                    targets.push(target);
                }
                Err(reason) => {
                    tracing::debug!(subject_id = %prior.id, %reason, "Skipping candidate");
                    skipped.push(SkippedTarget {
                        subject_id: prior.id,
                        reason,
                    });
                }
            }
        }

        BatchPlan {
            reference: self.reference.clone(),
            currency,
            targets,
            skipped,
        }
    }
}

fn assess(
    prior: &PriorOperation,
    currency: Option<&Currency>,
) -> std::result::Result<EligibleTarget, SkipReason> {
    if prior.status.is_blocking() {
        return Err(SkipReason::BlockingState {
            status: prior.status,
        });
    }
    if prior.status != PriorStatus::Succeeded {
        return Err(SkipReason::NotSettled {
            status: prior.status,
        });
    }
    if let Some(expected) = currency {
        if expected != &prior.currency {
            return Err(SkipReason::CurrencyMismatch {
                expected: expected.to_string(),
                found: prior.currency.to_string(),
            });
        }
    }
    EligibleTarget::from_prior(prior).ok_or(SkipReason::AlreadyFullySettled)
}
