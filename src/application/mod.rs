//! Orchestration of idempotent submissions and bulk runs.
//!
//! A run is `BatchPlanner::plan` (or `discover`), then `BatchPlan::preview`
//! as often as wanted, then `BatchExecutor::execute`, which consumes the plan,
//! and finally `reconcile` over the plan and its audit log.

pub mod executor;
pub mod planner;
pub mod reconcile;
pub mod retry;
pub mod submitter;
