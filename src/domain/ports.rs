use super::key::IdempotencyKey;
use super::operation::{LogicalOperation, RemoteEffectRecord};
use super::target::PriorOperation;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Raw failure reported by a ledger call, before classification.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerFault {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("idempotency key {key} already used with different parameters")]
    KeyReuseMismatch { key: IdempotencyKey },
    #[error("not found: {0}")]
    NotFound(String),
}

/// Filter for list-operations-by-filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    /// Match operations whose metadata contains this key/value pair.
    pub metadata: Option<(String, String)>,
    pub limit: Option<usize>,
}

impl OperationFilter {
    pub fn by_metadata(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            metadata: Some((key.into(), value.into())),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, operation: &PriorOperation) -> bool {
        match &self.metadata {
            Some((key, value)) => operation.metadata.get(key) == Some(value),
            None => true,
        }
    }
}

/// The four calls the bulk machinery needs from a remote ledger.
///
/// Implementations must enforce per-key uniqueness themselves: a replay of a
/// key with the same parameters returns the original record, a replay with
/// different parameters fails with [`LedgerFault::KeyReuseMismatch`].
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn create_operation(
        &self,
        operation: &LogicalOperation,
        key: &IdempotencyKey,
    ) -> Result<RemoteEffectRecord, LedgerFault>;

    async fn fetch_operation(&self, id: &str) -> Result<PriorOperation, LedgerFault>;

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> Result<Vec<PriorOperation>, LedgerFault>;

    async fn create_reversal(
        &self,
        operation: &LogicalOperation,
        key: &IdempotencyKey,
    ) -> Result<RemoteEffectRecord, LedgerFault>;
}

pub type LedgerClientRef = Arc<dyn LedgerClient>;
