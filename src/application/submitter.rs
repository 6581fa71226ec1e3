use crate::domain::failure::{FailureClass, FailureCode};
use crate::domain::key::IdempotencyKey;
use crate::domain::operation::{ActionKind, LogicalOperation, RemoteEffectRecord};
use crate::domain::ports::{LedgerClientRef, LedgerFault};
use crate::error::SubmissionError;
use std::time::Duration;

/// Sends one operation to the ledger with its idempotency key attached and
/// classifies the outcome.
///
/// A returned record may be freshly created or the ledger's replay of an
/// earlier call with the same key; both are success.
#[derive(Clone)]
pub struct IdempotentSubmitter {
    ledger: LedgerClientRef,
    request_timeout: Duration,
}

impl IdempotentSubmitter {
    pub fn new(ledger: LedgerClientRef, request_timeout: Duration) -> Self {
        Self {
            ledger,
            request_timeout,
        }
    }

    pub async fn submit(
        &self,
        operation: &LogicalOperation,
        key: &IdempotencyKey,
    ) -> Result<RemoteEffectRecord, SubmissionError> {
        let call = async {
            match operation.action() {
                ActionKind::CreatePayment => self.ledger.create_operation(operation, key).await,
                ActionKind::Refund => self.ledger.create_reversal(operation, key).await,
            }
        };

        // Runs to completion or timeout. Batch cancellation is only observed
        // between calls.
        let result = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(LedgerFault::Timeout),
        };

        match result {
            Ok(record) => {
                tracing::debug!(
                    subject_id = %operation.identity.subject_id,
                    key = %key,
                    record_id = %record.id,
                    "Ledger accepted operation"
                );
                Ok(record)
            }
            Err(fault) => {
                let error = classify(fault, key);
                if let SubmissionError::IdempotencyCollision { .. } = error {
                    tracing::error!(
                        subject_id = %operation.identity.subject_id,
                        key = %key,
                        "Idempotency key reused with different parameters; key derivation is not deterministic"
                    );
                }
                Err(error)
            }
        }
    }
}

/// Maps a raw ledger fault onto the submission taxonomy.
pub fn classify(fault: LedgerFault, key: &IdempotencyKey) -> SubmissionError {
    match fault {
        LedgerFault::Connection(message) => SubmissionError::Transient { message },
        LedgerFault::Timeout => SubmissionError::Transient {
            message: "request timed out".to_string(),
        },
        LedgerFault::Server { status, message } => {
            if status == 429 || (500..600).contains(&status) {
                SubmissionError::Transient {
                    message: format!("HTTP {status}: {message}"),
                }
            } else {
                SubmissionError::Permanent {
                    code: FailureCode::Unknown(format!("http_{status}")),
                    message,
                }
            }
        }
        LedgerFault::Rejected { code, message } => {
            let code = FailureCode::parse(&code);
            match code.class() {
                FailureClass::Temporary => SubmissionError::Transient {
                    message: format!("{code}: {message}"),
                },
                FailureClass::Permanent | FailureClass::ActionRequired | FailureClass::Unknown => {
                    SubmissionError::Permanent { code, message }
                }
            }
        }
        LedgerFault::KeyReuseMismatch { .. } => {
            SubmissionError::IdempotencyCollision { key: key.clone() }
        }
        LedgerFault::NotFound(id) => SubmissionError::Permanent {
            code: FailureCode::InvalidRequest,
            message: format!("no such operation: {id}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::key::derive;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::operation::OperationIdentity;
    use crate::domain::ports::{LedgerClient, OperationFilter};
    use crate::domain::target::PriorOperation;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn booking(amount: rust_decimal::Decimal) -> (LogicalOperation, IdempotencyKey) {
        let identity =
            OperationIdentity::new("agency_042", "booking_7891", ActionKind::CreatePayment).unwrap();
        let key = derive(&identity, 32);
        let op = LogicalOperation::new(
            identity,
            Amount::positive(amount).unwrap(),
            Currency::new("eur").unwrap(),
        );
        (op, key)
    }

    #[tokio::test]
    async fn test_repeated_submission_yields_one_record() {
        let ledger = InMemoryLedger::new();
        let submitter = IdempotentSubmitter::new(Arc::new(ledger.clone()), Duration::from_secs(5));
        let (op, key) = booking(dec!(2400.00));

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(submitter.submit(&op, &key).await.unwrap().id);
        }

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(ledger.effects_applied().await, 1);
    }

    #[tokio::test]
    async fn test_changed_amount_is_a_collision() {
        let ledger = InMemoryLedger::new();
        let submitter = IdempotentSubmitter::new(Arc::new(ledger.clone()), Duration::from_secs(5));
        let (op, key) = booking(dec!(100.00));
        submitter.submit(&op, &key).await.unwrap();

        let (changed, _) = booking(dec!(200.00));
        let err = submitter.submit(&changed, &key).await.unwrap_err();

        assert_eq!(err, SubmissionError::IdempotencyCollision { key });
        assert!(!err.is_retryable());
        assert_eq!(ledger.effects_applied().await, 1);
    }

    #[test]
    fn test_classification() {
        let key = IdempotencyKey::from_raw("k").unwrap();
        assert!(classify(LedgerFault::Connection("reset".into()), &key).is_retryable());
        assert!(classify(LedgerFault::Timeout, &key).is_retryable());
        assert!(
            classify(
                LedgerFault::Server {
                    status: 429,
                    message: "slow down".into()
                },
                &key
            )
            .is_retryable()
        );
        assert!(
            classify(
                LedgerFault::Rejected {
                    code: "processing_error".into(),
                    message: "hiccup".into()
                },
                &key
            )
            .is_retryable()
        );
        assert!(matches!(
            classify(
                LedgerFault::Rejected {
                    code: "insufficient_funds".into(),
                    message: "declined".into()
                },
                &key
            ),
            SubmissionError::Permanent {
                code: FailureCode::InsufficientFunds,
                ..
            }
        ));
        assert!(matches!(
            classify(
                LedgerFault::Rejected {
                    code: "something_new".into(),
                    message: "?".into()
                },
                &key
            ),
            SubmissionError::Permanent {
                code: FailureCode::Unknown(_),
                ..
            }
        ));
    }

    struct SlowLedger;

    #[async_trait]
    impl LedgerClient for SlowLedger {
        async fn create_operation(
            &self,
            _operation: &LogicalOperation,
            _key: &IdempotencyKey,
        ) -> Result<RemoteEffectRecord, LedgerFault> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(LedgerFault::Connection("unreachable".into()))
        }

        async fn fetch_operation(&self, id: &str) -> Result<PriorOperation, LedgerFault> {
            Err(LedgerFault::NotFound(id.to_string()))
        }

        async fn list_operations(
            &self,
            _filter: &OperationFilter,
        ) -> Result<Vec<PriorOperation>, LedgerFault> {
            Ok(Vec::new())
        }

        async fn create_reversal(
            &self,
            operation: &LogicalOperation,
            key: &IdempotencyKey,
        ) -> Result<RemoteEffectRecord, LedgerFault> {
            self.create_operation(operation, key).await
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let submitter = IdempotentSubmitter::new(Arc::new(SlowLedger), Duration::from_millis(20));
        let (op, key) = booking(dec!(1.00));
        let err = submitter.submit(&op, &key).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
