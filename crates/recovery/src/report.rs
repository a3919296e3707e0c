use faultline_core::types::RecoveryPolicy;
use serde::Serialize;

use crate::sli::SliMetrics;

const LOW_SUCCESS_RATE: f64 = 50.0;
const SLOW_MTTR_MS: u64 = 30_000;
const FREQUENT_RECOVERIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PolicyStatus {
    Registered(RecoveryPolicy),
    Missing { status: String },
}

impl From<Option<RecoveryPolicy>> for PolicyStatus {
    fn from(policy: Option<RecoveryPolicy>) -> Self {
        match policy {
            Some(p) => PolicyStatus::Registered(p),
            None => PolicyStatus::Missing {
                status: "no policy registered".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub workload: String,
    pub policy: PolicyStatus,
    pub metrics: SliMetrics,
    pub recommendations: Vec<String>,
}

impl RecoveryReport {
    pub fn new(workload: &str, policy: Option<RecoveryPolicy>, metrics: SliMetrics) -> Self {
        let recommendations = recommendations(&metrics, policy.is_some());
        Self {
            workload: workload.to_string(),
            policy: policy.into(),
            metrics,
            recommendations,
        }
    }
}

pub fn recommendations(metrics: &SliMetrics, has_policy: bool) -> Vec<String> {
    let mut out = Vec::new();
    if metrics.success_rate < LOW_SUCCESS_RATE {
        out.push("Low success rate: consider manual recovery or a policy change".to_string());
    }
    if metrics.avg_mttr_ms > SLOW_MTTR_MS {
        out.push("High average MTTR: recovery is slow and may need optimization".to_string());
    }
    if metrics.total_recoveries > FREQUENT_RECOVERIES {
        out.push("Workload is recovering frequently, which may indicate a deeper issue".to_string());
    }
    if !has_policy {
        out.push("No recovery policy set: configure automated recovery".to_string());
    }
    if out.is_empty() {
        out.push("System is healthy and recovering well".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sli::compute_sli;
    use chrono::Utc;
    use faultline_core::types::{RecoveryMetric, RecoveryOptions, RecoveryStrategy};

    fn policy() -> RecoveryPolicy {
        RecoveryPolicy {
            strategy: RecoveryStrategy::Restart,
            options: RecoveryOptions::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_healthy_with_policy() {
        let report = RecoveryReport::new("web1", Some(policy()), compute_sli(&[]));
        assert_eq!(report.recommendations, vec!["System is healthy and recovering well"]);
    }

    #[test]
    fn test_missing_policy_serializes_status() {
        let report = RecoveryReport::new("web1", None, compute_sli(&[]));
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].starts_with("No recovery policy"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["policy"]["status"], "no policy registered");
    }

    #[test]
    fn test_slow_frequent_and_failing() {
        let history: Vec<RecoveryMetric> = (0..12)
            .map(|i| RecoveryMetric {
                recovered: i % 4 == 0,
                strategy: RecoveryStrategy::Restart,
                mttr_ms: (i % 4 == 0).then_some(45_000),
                attempts_needed: 1,
                timestamp: Utc::now(),
            })
            .collect();
        let recs = recommendations(&compute_sli(&history), true);
        assert_eq!(recs.len(), 3);
        assert!(recs[0].starts_with("Low success rate"));
        assert!(recs[1].starts_with("High average MTTR"));
        assert!(recs[2].contains("recovering frequently"));
    }
}
