//! Shared helpers for application unit tests.

use std::sync::Mutex;
use std::time::Duration;

use crate::infra::metrics::{MetricLabels, MetricsSink};

pub(crate) use super::raster::fixtures::png;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Observation {
    pub metric: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Observation {
    pub(crate) fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Keeps every observation in memory.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingSink {
    pub(crate) fn named(&self, metric: &str) -> Vec<Observation> {
        self.observations
            .lock()
            .unwrap()
            .iter()
            .filter(|observation| observation.metric == metric)
            .cloned()
            .collect()
    }

    fn push(&self, metric: &'static str, labels: &MetricLabels, value: f64) {
        self.observations.lock().unwrap().push(Observation {
            metric,
            labels: labels.to_vec(),
            value,
        });
    }
}

impl MetricsSink for RecordingSink {
    fn observe_duration(&self, metric: &'static str, labels: &MetricLabels, seconds: f64) {
        self.push(metric, labels, seconds);
    }

    fn observe_size(&self, metric: &'static str, labels: &MetricLabels, bytes: u64) {
        self.push(metric, labels, bytes as f64);
    }

    fn increment_error(&self, metric: &'static str, labels: &MetricLabels) {
        self.push(metric, labels, 1.0);
    }
}

/// Poll `condition` until it holds or a generous timeout passes.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}
