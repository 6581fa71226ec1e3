use crate::domain::key::IdempotencyKey;
use crate::domain::money::Amount;
use crate::domain::operation::{
    ActionKind, EffectStatus, LogicalOperation, ParameterFingerprint, RemoteEffectRecord,
};
use crate::domain::ports::{LedgerClient, LedgerFault, OperationFilter};
use crate::domain::target::{PriorOperation, PriorStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct KeyEntry {
    fingerprint: ParameterFingerprint,
    record: RemoteEffectRecord,
    stored_at: DateTime<Utc>,
}

/// Scripted misbehaviour for one subject.
#[derive(Debug, Clone)]
enum Fault {
    /// Fail before anything is applied.
    Before(LedgerFault),
    /// Apply the effect, then lose the response.
    AfterApply(LedgerFault),
}

#[derive(Debug, Default)]
struct LedgerState {
    payments: HashMap<String, PriorOperation>,
    order: Vec<String>,
    keys: HashMap<IdempotencyKey, KeyEntry>,
    next_faults: HashMap<String, VecDeque<Fault>>,
    sticky_faults: HashMap<String, LedgerFault>,
    reversal_status: HashMap<String, EffectStatus>,
    next_id: u64,
    calls: u64,
    effects_applied: u64,
    clock_offset_ms: i64,
}

impl LedgerState {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::milliseconds(self.clock_offset_ms)
    }

    fn mint_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }

    fn take_fault(&mut self, subject_id: &str) -> Option<Fault> {
        if let Some(fault) = self.sticky_faults.get(subject_id) {
            return Some(Fault::Before(fault.clone()));
        }
        self.next_faults
            .get_mut(subject_id)
            .and_then(VecDeque::pop_front)
    }

    /// Returns the stored record for a live key, or a mismatch fault.
    fn replay(
        &mut self,
        key: &IdempotencyKey,
        fingerprint: &ParameterFingerprint,
        validity: Duration,
    ) -> Option<Result<RemoteEffectRecord, LedgerFault>> {
        let now = self.now();
        let entry = self.keys.get(key)?;
        if entry.stored_at + validity <= now {
            self.keys.remove(key);
            return None;
        }
        if &entry.fingerprint == fingerprint {
            Some(Ok(entry.record.clone()))
        } else {
            Some(Err(LedgerFault::KeyReuseMismatch { key: key.clone() }))
        }
    }
}

/// A process-local ledger with real idempotency semantics.
///
/// Keys are honoured for `key_validity`; replays with identical material
/// parameters return the original record, replays with different ones are
/// rejected. Faults can be scripted per subject for testing and rehearsals.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    key_validity: Duration,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// Creates an empty ledger honouring keys for 24 hours.
    pub fn new() -> Self {
        Self::with_key_validity(Duration::hours(24))
    }

    pub fn with_key_validity(key_validity: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            key_validity,
        }
    }

    /// Seeds a prior payment.
    pub async fn insert_payment(&self, payment: PriorOperation) {
        let mut state = self.state.write().await;
        if !state.payments.contains_key(&payment.id) {
            state.order.push(payment.id.clone());
        }
        state.payments.insert(payment.id.clone(), payment);
    }

    pub async fn set_status(&self, payment_id: &str, status: PriorStatus) -> bool {
        let mut state = self.state.write().await;
        match state.payments.get_mut(payment_id) {
            Some(payment) => {
                payment.status = status;
                true
            }
            None => false,
        }
    }

    /// The next call touching `subject_id` fails with `fault` before applying.
    pub async fn fail_next(&self, subject_id: &str, fault: LedgerFault) {
        let mut state = self.state.write().await;
        state
            .next_faults
            .entry(subject_id.to_string())
            .or_default()
            .push_back(Fault::Before(fault));
    }

    /// The next call touching `subject_id` applies its effect but the caller
    /// sees a connection error.
    pub async fn lose_next_response(&self, subject_id: &str) {
        let mut state = self.state.write().await;
        state
            .next_faults
            .entry(subject_id.to_string())
            .or_default()
            .push_back(Fault::AfterApply(LedgerFault::Connection(
                "connection reset after request was sent".to_string(),
            )));
    }

    /// Every call touching `subject_id` fails with `fault`.
    pub async fn fail_always(&self, subject_id: &str, fault: LedgerFault) {
        let mut state = self.state.write().await;
        state.sticky_faults.insert(subject_id.to_string(), fault);
    }

    /// Reversals of `subject_id` are accepted but reported with `status`.
    ///
    /// A pending reversal leaves the payment in `reversal_pending` without
    /// settling anything; a failed one leaves the payment untouched.
    pub async fn set_reversal_status(&self, subject_id: &str, status: EffectStatus) {
        let mut state = self.state.write().await;
        state.reversal_status.insert(subject_id.to_string(), status);
    }

    pub async fn advance_clock(&self, by: Duration) {
        let mut state = self.state.write().await;
        state.clock_offset_ms += by.num_milliseconds();
    }

    /// Number of create/reversal calls received.
    pub async fn calls(&self) -> u64 {
        self.state.read().await.calls
    }

    /// Number of distinct effects actually applied.
    pub async fn effects_applied(&self) -> u64 {
        self.state.read().await.effects_applied
    }

    async fn apply<F>(
        &self,
        operation: &LogicalOperation,
        key: &IdempotencyKey,
        effect: F,
    ) -> Result<RemoteEffectRecord, LedgerFault>
    where
        F: FnOnce(&mut LedgerState) -> Result<RemoteEffectRecord, LedgerFault>,
    {
        let mut state = self.state.write().await;
        state.calls += 1;

        let fault = state.take_fault(&operation.identity.subject_id);
        if let Some(Fault::Before(fault)) = fault {
            return Err(fault);
        }

        let fingerprint = operation.fingerprint();
        if let Some(replayed) = state.replay(key, &fingerprint, self.key_validity) {
            return match (replayed, fault) {
                (Ok(_), Some(Fault::AfterApply(lost))) => Err(lost),
                (result, _) => result,
            };
        }

        let record = effect(&mut *state)?;
        state.effects_applied += 1;
        let stored_at = state.now();
        state.keys.insert(
            key.clone(),
            KeyEntry {
                fingerprint,
                record: record.clone(),
                stored_at,
            },
        );

        match fault {
            Some(Fault::AfterApply(lost)) => Err(lost),
            _ => Ok(record),
        }
    }
}

fn rejected(code: &str, message: impl Into<String>) -> LedgerFault {
    LedgerFault::Rejected {
        code: code.to_string(),
        message: message.into(),
    }
}

fn record(
    id: String,
    operation: &LogicalOperation,
    key: &IdempotencyKey,
    status: EffectStatus,
    created: DateTime<Utc>,
) -> RemoteEffectRecord {
    RemoteEffectRecord {
        id,
        key: key.clone(),
        action: operation.action(),
        subject_id: operation.identity.subject_id.clone(),
        amount: operation.amount,
        currency: operation.currency.clone(),
        status,
        created,
        metadata: operation.metadata.clone(),
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn create_operation(
        &self,
        operation: &LogicalOperation,
        key: &IdempotencyKey,
    ) -> Result<RemoteEffectRecord, LedgerFault> {
        if operation.action() != ActionKind::CreatePayment {
            return Err(rejected(
                "invalid_request",
                format!("{} is not a payment creation", operation.action()),
            ));
        }
        self.apply(operation, key, |state| {
            if operation.amount.is_zero() {
                return Err(rejected("invalid_request", "amount must be positive"));
            }
            let id = state.mint_id("pi");
            let created = state.now();
            let mut metadata: BTreeMap<String, String> = operation.metadata.clone();
            metadata.insert(
                "subject_id".to_string(),
                operation.identity.subject_id.clone(),
            );
            state.order.push(id.clone());
            state.payments.insert(
                id.clone(),
                PriorOperation {
                    id: id.clone(),
                    amount: operation.amount,
                    settled_amount: Amount::ZERO,
                    currency: operation.currency.clone(),
                    status: PriorStatus::Succeeded,
                    metadata,
                },
            );
            Ok(record(id, operation, key, EffectStatus::Succeeded, created))
        })
        .await
    }

    async fn fetch_operation(&self, id: &str) -> Result<PriorOperation, LedgerFault> {
        let state = self.state.read().await;
        state
            .payments
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerFault::NotFound(id.to_string()))
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> Result<Vec<PriorOperation>, LedgerFault> {
        let state = self.state.read().await;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.payments.get(id))
            .filter(|payment| filter.matches(payment))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_reversal(
        &self,
        operation: &LogicalOperation,
        key: &IdempotencyKey,
    ) -> Result<RemoteEffectRecord, LedgerFault> {
        if operation.action() != ActionKind::Refund {
            return Err(rejected(
                "invalid_request",
                format!("{} is not a reversal", operation.action()),
            ));
        }
        self.apply(operation, key, |state| {
            let payment_id = &operation.identity.subject_id;
            let payment = state
                .payments
                .get(payment_id)
                .ok_or_else(|| rejected("invalid_request", format!("No such payment: {payment_id}")))?;

            match payment.status {
                PriorStatus::Succeeded => {}
                PriorStatus::Disputed => {
                    return Err(rejected("charge_disputed", "payment is under dispute"));
                }
                other => {
                    return Err(rejected(
                        "invalid_request",
                        format!("payment status is {other}"),
                    ));
                }
            }
            if payment.currency != operation.currency {
                return Err(rejected("invalid_request", "currency does not match payment"));
            }
            let remaining = payment.remaining();
            if remaining.is_zero() {
                return Err(rejected(
                    "charge_already_refunded",
                    "payment has already been fully refunded",
                ));
            }
            if operation.amount > remaining || operation.amount.is_zero() {
                return Err(rejected(
                    "amount_too_large",
                    format!(
                        "refund of {} exceeds remaining {}",
                        operation.amount, remaining
                    ),
                ));
            }

            let id = state.mint_id("re");
            let created = state.now();
            let status = state
                .reversal_status
                .get(payment_id)
                .copied()
                .unwrap_or(EffectStatus::Succeeded);
            if let Some(payment) = state.payments.get_mut(payment_id) {
                match status {
                    EffectStatus::Succeeded => payment.settled_amount += operation.amount,
                    EffectStatus::Pending => payment.status = PriorStatus::ReversalPending,
                    EffectStatus::Failed => {}
                }
            }
            Ok(record(id, operation, key, status, created))
        })
        .await
    }
}
