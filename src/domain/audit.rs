use super::key::IdempotencyKey;
use super::money::Amount;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded {
        record_id: String,
    },
    /// Accepted by the ledger but not yet settled.
    Pending {
        record_id: String,
    },
    Failed {
        /// `transient`, `permanent` or `idempotency_collision`.
        error_kind: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        guidance: Option<String>,
    },
}

/// One attempted operation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub subject_id: String,
    pub key: IdempotencyKey,
    pub amount: Amount,
    pub outcome: AuditOutcome,
    pub attempts: u32,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
    /// False when the key was random, so a rerun would not be deduplicated.
    pub replay_protected: bool,
}

impl AuditEntry {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Succeeded { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Pending { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Failed { .. })
    }

    pub fn record_id(&self) -> Option<&str> {
        match &self.outcome {
            AuditOutcome::Succeeded { record_id } | AuditOutcome::Pending { record_id } => {
                Some(record_id)
            }
            AuditOutcome::Failed { .. } => None,
        }
    }
}

fn serialize_millis<S>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

/// Append-only sequence of audit entries, in submission order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| e.succeeded())
    }

    pub fn pending(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| e.is_pending())
    }

    pub fn failed(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| e.is_failed())
    }

    pub fn find(&self, subject_id: &str) -> Option<&AuditEntry> {
        self.entries.iter().find(|e| e.subject_id == subject_id)
    }
}
