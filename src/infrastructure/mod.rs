//! Ledger adapters.

pub mod in_memory;
