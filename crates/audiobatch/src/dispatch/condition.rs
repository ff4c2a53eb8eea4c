//! Threshold evaluation for notification conditions.

use serde::Serialize;

use crate::config::{NotificationCondition, NotificationEvent, Threshold, ThresholdMetric, ThresholdOperator};
use crate::orchestrator::job::JobCounters;

/// Numbers a threshold can compare against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetrics {
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub failure_rate: f64,
}

impl From<&JobCounters> for EventMetrics {
    fn from(counters: &JobCounters) -> Self {
        Self {
            total_files: counters.total_files,
            processed_files: counters.processed_files,
            failed_files: counters.failed_files,
            failure_rate: counters.failure_rate(),
        }
    }
}

impl EventMetrics {
    pub fn value(&self, metric: ThresholdMetric) -> f64 {
        match metric {
            ThresholdMetric::FailedFiles => self.failed_files as f64,
            ThresholdMetric::ProcessedFiles => self.processed_files as f64,
            ThresholdMetric::FailureRate => self.failure_rate,
            ThresholdMetric::TotalFiles => self.total_files as f64,
        }
    }
}

pub fn threshold_holds(threshold: &Threshold, metrics: &EventMetrics) -> bool {
    let actual = metrics.value(threshold.metric);
    match threshold.operator {
        ThresholdOperator::Gt => actual > threshold.value,
        ThresholdOperator::Gte => actual >= threshold.value,
        ThresholdOperator::Lt => actual < threshold.value,
        ThresholdOperator::Lte => actual <= threshold.value,
        ThresholdOperator::Eq => (actual - threshold.value).abs() < f64::EPSILON,
    }
}

/// A threshold never matches an event that carries no metrics.
pub fn condition_matches(
    condition: &NotificationCondition,
    event: NotificationEvent,
    metrics: Option<&EventMetrics>,
) -> bool {
    if condition.event != event {
        return false;
    }
    match (&condition.threshold, metrics) {
        (None, _) => true,
        (Some(threshold), Some(metrics)) => threshold_holds(threshold, metrics),
        (Some(_), None) => false,
    }
}
