//! DR Orchestrator
//!
//! Runs each managed system through discovery, normalization, reconciliation
//! of both sites and cross-site verification:
//! - Runner: the state machine, with dry-run
//! - Lock: single run per managed system
//! - Report: human and JSON run reports
//! - Metrics: Prometheus counters of runs and operations

pub mod lock;
pub mod metrics;
pub mod report;
pub mod runner;

pub use lock::*;
pub use metrics::*;
pub use report::*;
pub use runner::*;
