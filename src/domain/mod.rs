//! Domain layer: value objects, records and the ledger port.

pub mod audit;
pub mod failure;
pub mod key;
pub mod money;
pub mod operation;
pub mod ports;
pub mod target;
