use super::money::{Amount, Currency};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a prior operation as reported by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorStatus {
    Succeeded,
    Pending,
    RequiresAction,
    Failed,
    Canceled,
    /// A chargeback dispute is open against the payment.
    Disputed,
    /// A reversal was issued and has not settled yet.
    ReversalPending,
}

impl PriorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Pending => "pending",
            Self::RequiresAction => "requires_action",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Disputed => "disputed",
            Self::ReversalPending => "reversal_pending",
        }
    }

    /// Non-terminal states during which a new reversal must not be issued.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::RequiresAction | Self::Disputed | Self::ReversalPending
        )
    }
}

impl fmt::Display for PriorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a prior payment, as fetched from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorOperation {
    pub id: String,
    pub amount: Amount,
    /// Sum of reversals already applied against `amount`.
    pub settled_amount: Amount,
    pub currency: Currency,
    pub status: PriorStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PriorOperation {
    pub fn remaining(&self) -> Amount {
        self.amount.saturating_sub(self.settled_amount)
    }
}

/// Whether a planned reversal covers the whole payment or what is left of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundKind {
    Full,
    PartialRemainder,
}

impl RefundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::PartialRemainder => "partial_remainder",
        }
    }
}

impl fmt::Display for RefundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason attached to every reversal in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    Duplicate,
    Fraudulent,
    #[default]
    RequestedByCustomer,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Fraudulent => "fraudulent",
            Self::RequestedByCustomer => "requested_by_customer",
        }
    }
}

impl std::str::FromStr for RefundReason {
    type Err = crate::error::LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "duplicate" => Ok(Self::Duplicate),
            "fraudulent" => Ok(Self::Fraudulent),
            "requested_by_customer" => Ok(Self::RequestedByCustomer),
            other => Err(crate::error::LedgerError::ValidationError(format!(
                "Unknown refund reason: {other:?}"
            ))),
        }
    }
}

/// A prior operation that will receive the bulk action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibleTarget {
    pub subject_id: String,
    pub original_amount: Amount,
    pub already_settled_amount: Amount,
    /// Always `original_amount - already_settled_amount`, always non-zero.
    pub remaining_amount: Amount,
    pub currency: Currency,
    pub kind: RefundKind,
    pub metadata: BTreeMap<String, String>,
}

impl EligibleTarget {
    /// Builds a target from a snapshot, or `None` if nothing remains.
    pub fn from_prior(prior: &PriorOperation) -> Option<Self> {
        let remaining = prior.remaining();
        if remaining.is_zero() {
            return None;
        }
        let kind = if prior.settled_amount.is_zero() {
            RefundKind::Full
        } else {
            RefundKind::PartialRemainder
        };
        Some(Self {
            subject_id: prior.id.clone(),
            original_amount: prior.amount,
            already_settled_amount: prior.settled_amount,
            remaining_amount: remaining,
            currency: prior.currency.clone(),
            kind,
            metadata: prior.metadata.clone(),
        })
    }
}

/// Why a candidate was excluded from the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyFullySettled,
    /// Non-terminal state that forbids a new action right now.
    BlockingState { status: PriorStatus },
    /// The payment never completed, so there is nothing to reverse.
    NotSettled { status: PriorStatus },
    CurrencyMismatch { expected: String, found: String },
    NotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyFullySettled => f.write_str("already fully settled"),
            Self::BlockingState { status } => write!(f, "blocked by state '{status}'"),
            Self::NotSettled { status } => write!(f, "status is '{status}', not 'succeeded'"),
            Self::CurrencyMismatch { expected, found } => {
                write!(f, "currency '{found}' does not match batch currency '{expected}'")
            }
            Self::NotFound => f.write_str("not found in ledger"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedTarget {
    pub subject_id: String,
    pub reason: SkipReason,
}
