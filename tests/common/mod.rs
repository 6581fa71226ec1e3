#![allow(dead_code)]

use bulkpay::application::executor::BatchExecutor;
use bulkpay::application::planner::{BatchPlan, BatchPlanner};
use bulkpay::config::BatchConfig;
use bulkpay::domain::money::{Amount, Currency};
use bulkpay::domain::ports::LedgerClientRef;
use bulkpay::domain::target::{PriorOperation, PriorStatus};
use bulkpay::infrastructure::in_memory::InMemoryLedger;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const REFERENCE: &str = "RECALL-PRO3000";

pub fn charge(id: &str, amount: Decimal, refunded: Decimal) -> PriorOperation {
    PriorOperation {
        id: id.to_string(),
        amount: Amount::new(amount).unwrap(),
        settled_amount: Amount::new(refunded).unwrap(),
        currency: Currency::new("eur").unwrap(),
        status: PriorStatus::Succeeded,
        metadata: BTreeMap::from([("product".to_string(), "pro_3000".to_string())]),
    }
}

pub async fn seeded_ledger(charges: Vec<PriorOperation>) -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    for charge in charges {
        ledger.insert_payment(charge).await;
    }
    ledger
}

/// Millisecond delays so retries do not slow the suite down.
pub fn fast_config() -> BatchConfig {
    BatchConfig {
        base_delay_ms: 2,
        max_delay_ms: 20,
        request_timeout_ms: 1_000,
        chunk_pause_ms: 0,
        ..BatchConfig::default()
    }
}

pub fn executor(ledger: &InMemoryLedger) -> BatchExecutor {
    BatchExecutor::from_config(Arc::new(ledger.clone()), &fast_config()).unwrap()
}

pub async fn plan(ledger: &InMemoryLedger, ids: &[&str]) -> BatchPlan {
    let client: LedgerClientRef = Arc::new(ledger.clone());
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    BatchPlanner::new(client, REFERENCE)
        .unwrap()
        .plan(&ids)
        .await
        .unwrap()
}
