//! Metrics collaborator used by the media components.

use metrics::{Label, counter, histogram};

pub type MetricLabels = [(&'static str, String)];

/// Sink for the duration, size and error observations the transformer and
/// composer emit on every path.
pub trait MetricsSink: Send + Sync {
    fn observe_duration(&self, metric: &'static str, labels: &MetricLabels, seconds: f64);

    fn observe_size(&self, metric: &'static str, labels: &MetricLabels, bytes: u64);

    fn increment_error(&self, metric: &'static str, labels: &MetricLabels);
}

/// Forwards observations to whatever `metrics` recorder is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

fn to_labels(labels: &MetricLabels) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl MetricsSink for RecorderSink {
    fn observe_duration(&self, metric: &'static str, labels: &MetricLabels, seconds: f64) {
        histogram!(metric, to_labels(labels)).record(seconds);
    }

    fn observe_size(&self, metric: &'static str, labels: &MetricLabels, bytes: u64) {
        histogram!(metric, to_labels(labels)).record(bytes as f64);
    }

    fn increment_error(&self, metric: &'static str, labels: &MetricLabels) {
        counter!(metric, to_labels(labels)).increment(1);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn observe_duration(&self, _metric: &'static str, _labels: &MetricLabels, _seconds: f64) {}

    fn observe_size(&self, _metric: &'static str, _labels: &MetricLabels, _bytes: u64) {}

    fn increment_error(&self, _metric: &'static str, _labels: &MetricLabels) {}
}
