//! Auto-recovery: per-workload health monitors that repair unhealthy
//! workloads with a configured strategy, plus SLI reporting over the
//! recorded recovery metrics.

pub mod controller;
pub mod report;
pub mod sli;
pub mod strategy;

pub use controller::{ProcessInfo, RecoveryController, StartOutcome};
pub use report::{recommendations, PolicyStatus, RecoveryReport};
pub use sli::{compute_sli, MetricHistory, SliMetrics};
pub use strategy::{StrategyExecutor, StrategyOutcome};
