use crate::domain::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AuditRow<'a> {
    subject_id: &'a str,
    key: &'a str,
    amount: String,
    outcome: &'static str,
    record_id: &'a str,
    error_kind: &'a str,
    reason: &'a str,
    guidance: &'a str,
    attempts: u32,
    elapsed_ms: u64,
    timestamp: String,
    replay_protected: bool,
}

impl<'a> From<&'a AuditEntry> for AuditRow<'a> {
    fn from(entry: &'a AuditEntry) -> Self {
        let (outcome, record_id, error_kind, reason, guidance) = match &entry.outcome {
            AuditOutcome::Succeeded { record_id } => ("succeeded", record_id.as_str(), "", "", ""),
            AuditOutcome::Pending { record_id } => ("pending", record_id.as_str(), "", "", ""),
            AuditOutcome::Failed {
                error_kind,
                reason,
                guidance,
            } => (
                "failed",
                "",
                error_kind.as_str(),
                reason.as_str(),
                guidance.as_deref().unwrap_or_default(),
            ),
        };
        Self {
            subject_id: &entry.subject_id,
            key: entry.key.as_str(),
            amount: entry.amount.to_string(),
            outcome,
            record_id,
            error_kind,
            reason,
            guidance,
            attempts: entry.attempts,
            elapsed_ms: entry.elapsed.as_millis() as u64,
            timestamp: entry.timestamp.to_rfc3339(),
            replay_protected: entry.replay_protected,
        }
    }
}

/// Writes an audit log as CSV, one row per attempted operation.
pub struct AuditWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AuditWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_log(&mut self, log: &AuditLog) -> Result<()> {
        for entry in log.entries() {
            self.writer.serialize(AuditRow::from(entry))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::key::IdempotencyKey;
    use crate::domain::money::Amount;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[test]
    fn test_writes_one_row_per_entry() {
        let mut log = AuditLog::new();
        log.append(AuditEntry {
            subject_id: "ch_1".to_string(),
            key: IdempotencyKey::from_raw("abc123").unwrap(),
            amount: Amount::new(dec!(349)).unwrap(),
            outcome: AuditOutcome::Succeeded {
                record_id: "re_000001".to_string(),
            },
            attempts: 1,
            elapsed: Duration::from_millis(7),
            timestamp: Utc::now(),
            replay_protected: true,
        });
        log.append(AuditEntry {
            subject_id: "ch_2".to_string(),
            key: IdempotencyKey::from_raw("def456").unwrap(),
            amount: Amount::new(dec!(299.00)).unwrap(),
            outcome: AuditOutcome::Failed {
                error_kind: "permanent".to_string(),
                reason: "charge_disputed".to_string(),
                guidance: Some("resolve the dispute first".to_string()),
            },
            attempts: 1,
            elapsed: Duration::from_millis(4),
            timestamp: Utc::now(),
            replay_protected: true,
        });
        log.append(AuditEntry {
            subject_id: "ch_3".to_string(),
            key: IdempotencyKey::from_raw("0a1b2c").unwrap(),
            amount: Amount::new(dec!(10)).unwrap(),
            outcome: AuditOutcome::Pending {
                record_id: "re_000003".to_string(),
            },
            attempts: 2,
            elapsed: Duration::from_millis(9),
            timestamp: Utc::now(),
            replay_protected: false,
        });

        let mut buffer = Vec::new();
        AuditWriter::new(&mut buffer).write_log(&log).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = output.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("subject_id,key,amount,outcome,record_id"));
        assert!(lines[0].ends_with(",timestamp,replay_protected"));
        assert!(lines[1].starts_with("ch_1,abc123,349.00,succeeded,re_000001,,,,1,7,"));
        assert!(lines[2].starts_with(
            "ch_2,def456,299.00,failed,,permanent,charge_disputed,resolve the dispute first,1,4,"
        ));
        assert!(lines[3].starts_with("ch_3,0a1b2c,10.00,pending,re_000003,,,,2,9,"));
        assert!(lines[3].ends_with(",false"));
    }
}
