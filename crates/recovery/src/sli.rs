//! Service level indicators over a workload's recovery metric history.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use faultline_core::types::RecoveryMetric;
use serde::Serialize;
use std::collections::VecDeque;

/// Entries exposed as `recentMetrics`.
const RECENT_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliMetrics {
    pub total_recoveries: usize,
    pub successful_recoveries: usize,
    /// Percent in `0.0..=100.0`, two decimals.
    pub success_rate: f64,
    #[serde(rename = "avgMTTRMs")]
    pub avg_mttr_ms: u64,
    /// Median over every entry; unsuccessful entries count as 0 ms.
    #[serde(rename = "medianMTTRMs")]
    pub median_mttr_ms: f64,
    pub last_recovery: Option<DateTime<Utc>>,
    pub recent_metrics: Vec<RecoveryMetric>,
}

/// Reduce a metric history (oldest first) to SLIs. An empty history is
/// reported as fully healthy.
pub fn compute_sli(history: &[RecoveryMetric]) -> SliMetrics {
    if history.is_empty() {
        return SliMetrics {
            total_recoveries: 0,
            successful_recoveries: 0,
            success_rate: 100.0,
            avg_mttr_ms: 0,
            median_mttr_ms: 0.0,
            last_recovery: None,
            recent_metrics: Vec::new(),
        };
    }

    let total = history.len();
    let successful: Vec<&RecoveryMetric> = history.iter().filter(|m| m.recovered).collect();

    let avg_mttr_ms = if successful.is_empty() {
        0
    } else {
        let sum: u64 = successful.iter().map(|m| m.mttr_ms.unwrap_or(0)).sum();
        (sum as f64 / successful.len() as f64).round() as u64
    };

    let all_mttr: Vec<u64> = history.iter().map(|m| m.mttr_ms.unwrap_or(0)).collect();
    let success_rate = successful.len() as f64 / total as f64 * 100.0;

    SliMetrics {
        total_recoveries: total,
        successful_recoveries: successful.len(),
        success_rate: (success_rate * 100.0).round() / 100.0,
        avg_mttr_ms,
        median_mttr_ms: median(all_mttr),
        last_recovery: history.last().map(|m| m.timestamp),
        recent_metrics: history[total.saturating_sub(RECENT_WINDOW)..].to_vec(),
    }
}

fn median(mut values: Vec<u64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid] as f64
    } else {
        (values[mid - 1] as f64 + values[mid] as f64) / 2.0
    }
}

/// Bounded per-workload metric history; the oldest entry is evicted first.
#[derive(Debug)]
pub struct MetricHistory {
    cap: usize,
    entries: DashMap<String, VecDeque<RecoveryMetric>>,
}

impl MetricHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: DashMap::new(),
        }
    }

    pub fn push(&self, workload: &str, metric: RecoveryMetric) {
        let mut history = self.entries.entry(workload.to_string()).or_default();
        history.push_back(metric);
        while history.len() > self.cap {
            history.pop_front();
        }
    }

    /// Oldest first.
    pub fn get(&self, workload: &str) -> Vec<RecoveryMetric> {
        self.entries
            .get(workload)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sli(&self, workload: &str) -> SliMetrics {
        compute_sli(&self.get(workload))
    }
}
