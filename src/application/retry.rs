use super::submitter::IdempotentSubmitter;
use crate::domain::key::IdempotencyKey;
use crate::domain::operation::{LogicalOperation, RemoteEffectRecord};
use crate::error::SubmissionError;
use rand::Rng;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap for the exponential part of the delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before attempt `attempt + 1`:
    /// `min(base * 2^(attempt-1), max) + uniform(0, base/2)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let exponential = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter = self
            .base_delay
            .mul_f64(rand::thread_rng().gen_range(0.0..0.5));
        exponential.saturating_add(jitter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Transient,
    Permanent,
    IdempotencyCollision,
}

/// One try of one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub status: AttemptStatus,
    pub elapsed: Duration,
    /// Sleep taken before the next attempt, if one followed.
    pub retry_delay: Option<Duration>,
    pub error: Option<String>,
}

/// Final result of a submission plus every attempt it took.
#[derive(Debug, Clone)]
pub struct RetriedSubmission {
    pub result: Result<RemoteEffectRecord, SubmissionError>,
    pub attempts: Vec<AttemptRecord>,
    pub elapsed: Duration,
}

impl RetriedSubmission {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Retries transient failures with the same key; stops at once on anything
/// else.
#[derive(Clone)]
pub struct BackoffRetrier {
    submitter: IdempotentSubmitter,
    policy: RetryPolicy,
}

impl BackoffRetrier {
    pub fn new(submitter: IdempotentSubmitter, policy: RetryPolicy) -> Self {
        Self { submitter, policy }
    }

    pub async fn retryable_submit(
        &self,
        operation: &LogicalOperation,
        key: &IdempotencyKey,
    ) -> RetriedSubmission {
        let started = Instant::now();
        let mut attempts = Vec::new();
        let mut attempt = 1;

        loop {
            let attempt_started = Instant::now();
            let result = self.submitter.submit(operation, key).await;
            let elapsed = attempt_started.elapsed();

            let error = match result {
                Ok(record) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        status: AttemptStatus::Succeeded,
                        elapsed,
                        retry_delay: None,
                        error: None,
                    });
                    return RetriedSubmission {
                        result: Ok(record),
                        attempts,
                        elapsed: started.elapsed(),
                    };
                }
                Err(error) => error,
            };

            let status = match error {
                SubmissionError::Transient { .. } => AttemptStatus::Transient,
                SubmissionError::Permanent { .. } => AttemptStatus::Permanent,
                SubmissionError::IdempotencyCollision { .. } => AttemptStatus::IdempotencyCollision,
            };

            if !error.is_retryable() || attempt >= self.policy.max_attempts {
                if error.is_retryable() {
                    tracing::warn!(
                        subject_id = %operation.identity.subject_id,
                        key = %key,
                        attempts = attempt,
                        error = %error,
                        "Retry budget exhausted"
                    );
                }
                attempts.push(AttemptRecord {
                    attempt,
                    status,
                    elapsed,
                    retry_delay: None,
                    error: Some(error.to_string()),
                });
                return RetriedSubmission {
                    result: Err(error),
                    attempts,
                    elapsed: started.elapsed(),
                };
            }

            let delay = self.policy.delay_after(attempt);
            tracing::warn!(
                subject_id = %operation.identity.subject_id,
                key = %key,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient failure"
            );
            attempts.push(AttemptRecord {
                attempt,
                status,
                elapsed,
                retry_delay: Some(delay),
                error: Some(error.to_string()),
            });
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::key::derive;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::operation::{ActionKind, OperationIdentity};
    use crate::domain::ports::LedgerFault;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn retrier(ledger: &InMemoryLedger, max_attempts: u32) -> BackoffRetrier {
        let submitter =
            IdempotentSubmitter::new(Arc::new(ledger.clone()), Duration::from_secs(5));
        BackoffRetrier::new(
            submitter,
            RetryPolicy::new(max_attempts, Duration::from_millis(10)),
        )
    }

    fn booking() -> (LogicalOperation, IdempotencyKey) {
        let identity =
            OperationIdentity::new("agency_099", "booking_555", ActionKind::CreatePayment).unwrap();
        let key = derive(&identity, 32);
        let op = LogicalOperation::new(
            identity,
            Amount::positive(dec!(1850.00)).unwrap(),
            Currency::new("eur").unwrap(),
        );
        (op, key)
    }

    #[test]
    fn test_delay_grows_and_stays_within_jitter_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        for attempt in 1..=4 {
            let exponential = Duration::from_millis(100 * 2_u64.pow(attempt - 1));
            let delay = policy.delay_after(attempt);
            assert!(delay >= exponential);
            assert!(delay < exponential + Duration::from_millis(50));
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy =
            RetryPolicy::new(10, Duration::from_millis(100)).max_delay(Duration::from_millis(250));
        let delay = policy.delay_after(8);
        assert!(delay < Duration::from_millis(300));
    }

    #[test]
    fn test_zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt_with_one_record() {
        let ledger = InMemoryLedger::new();
        ledger
            .fail_next("booking_555", LedgerFault::Connection("reset".into()))
            .await;
        ledger.fail_next("booking_555", LedgerFault::Timeout).await;
        let (op, key) = booking();

        let outcome = retrier(&ledger, 3).retryable_submit(&op, &key).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempt_count(), 3);
        assert_eq!(ledger.effects_applied().await, 1);
        let delays: Vec<_> = outcome
            .attempts
            .iter()
            .filter_map(|a| a.retry_delay)
            .collect();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] < delays[1]);
        assert_eq!(outcome.attempts[2].status, AttemptStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let ledger = InMemoryLedger::new();
        ledger
            .fail_always("booking_555", LedgerFault::Server {
                status: 502,
                message: "bad gateway".into(),
            })
            .await;
        let (op, key) = booking();

        let outcome = retrier(&ledger, 3).retryable_submit(&op, &key).await;

        assert!(matches!(outcome.result, Err(SubmissionError::Transient { .. })));
        assert_eq!(outcome.attempt_count(), 3);
        assert_eq!(ledger.calls().await, 3);
        assert!(outcome.attempts.last().unwrap().retry_delay.is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let ledger = InMemoryLedger::new();
        ledger
            .fail_next("booking_555", LedgerFault::Rejected {
                code: "card_declined".into(),
                message: "declined".into(),
            })
            .await;
        let (op, key) = booking();

        let outcome = retrier(&ledger, 3).retryable_submit(&op, &key).await;

        assert!(matches!(outcome.result, Err(SubmissionError::Permanent { .. })));
        assert_eq!(outcome.attempt_count(), 1);
        assert_eq!(ledger.calls().await, 1);
    }

    #[tokio::test]
    async fn test_lost_response_retry_returns_applied_record() {
        let ledger = InMemoryLedger::new();
        ledger.lose_next_response("booking_555").await;
        let (op, key) = booking();

        let outcome = retrier(&ledger, 3).retryable_submit(&op, &key).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempt_count(), 2);
        assert_eq!(ledger.effects_applied().await, 1);
    }
}
