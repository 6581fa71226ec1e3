use crate::domain::failure::FailureCode;
use crate::domain::key::IdempotencyKey;
use crate::domain::ports::LedgerFault;
use thiserror::Error;

/// Outcome classes of a single submission against the remote ledger.
///
/// Only `Transient` may be retried, and only with the same idempotency key.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("transient failure: {message}")]
    Transient { message: String },
    #[error("permanent failure ({code}): {message}")]
    Permanent { code: FailureCode, message: String },
    #[error("idempotency key {key} was reused with different parameters")]
    IdempotencyCollision { key: IdempotencyKey },
}

impl SubmissionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short machine-readable label used in audit output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::IdempotencyCollision { .. } => "idempotency_collision",
        }
    }

    /// What an operator should do about the failure, when the code says.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::Permanent { code, .. } => Some(code.guidance()),
            Self::Transient { .. } | Self::IdempotencyCollision { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Ledger error: {0}")]
    RemoteError(#[from] LedgerFault),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
