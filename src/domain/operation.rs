use super::key::IdempotencyKey;
use super::money::{Amount, Currency};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The kind of effect a logical operation asks the ledger to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a new payment (create-operation-with-key).
    CreatePayment,
    /// Reverse part or all of a prior payment (create-reversal-with-key).
    Refund,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatePayment => "create_payment",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create_payment" | "payment" => Ok(Self::CreatePayment),
            "refund" => Ok(Self::Refund),
            other => Err(LedgerError::ValidationError(format!(
                "Unknown action kind: {other:?}"
            ))),
        }
    }
}

/// What makes two operations "the same" operation.
///
/// The idempotency key is a function of this triple only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationIdentity {
    /// Who is acting (merchant, agency, batch reference).
    pub actor_id: String,
    /// What is acted upon (order, booking, prior charge).
    pub subject_id: String,
    pub action: ActionKind,
}

impl OperationIdentity {
    pub fn new(
        actor_id: impl Into<String>,
        subject_id: impl Into<String>,
        action: ActionKind,
    ) -> Result<Self, LedgerError> {
        let actor_id = actor_id.into();
        let subject_id = subject_id.into();
        if actor_id.trim().is_empty() || subject_id.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "actor_id and subject_id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            actor_id,
            subject_id,
            action,
        })
    }
}

/// A request to apply one financial effect, plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalOperation {
    pub identity: OperationIdentity,
    pub amount: Amount,
    pub currency: Currency,
    /// Free-form annotations. Never part of the key and never compared for
    /// collisions.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LogicalOperation {
    pub fn new(identity: OperationIdentity, amount: Amount, currency: Currency) -> Self {
        Self {
            identity,
            amount,
            currency,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn action(&self) -> ActionKind {
        self.identity.action
    }

    /// The parameters the ledger compares when a key is replayed.
    pub fn fingerprint(&self) -> ParameterFingerprint {
        ParameterFingerprint {
            action: self.identity.action,
            subject_id: self.identity.subject_id.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
        }
    }
}

/// The material parameters of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterFingerprint {
    pub action: ActionKind,
    pub subject_id: String,
    pub amount: Amount,
    pub currency: Currency,
}

/// Settlement state the ledger reports for an accepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectStatus {
    Succeeded,
    /// Accepted but not final; the money has not moved yet.
    Pending,
    Failed,
}

/// The ledger's own record of an applied operation.
///
/// Owned by the remote system; this is a read-through copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEffectRecord {
    /// Identifier assigned by the ledger (`pi_...`, `re_...`).
    pub id: String,
    pub key: IdempotencyKey,
    pub action: ActionKind,
    /// For payments, the payment itself; for reversals, the reversed payment.
    pub subject_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub status: EffectStatus,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
