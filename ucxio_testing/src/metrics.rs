//! Capture metrics emitted by a closure.

use metrics_util::debugging::{DebugValue, DebuggingRecorder};

/// One counter observed by [`capture_metrics`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedMetric {
    /// Metric name.
    pub name: String,
    /// Label pairs in emission order.
    pub labels: Vec<(String, String)>,
    /// Counter value.
    pub value: u64,
}

/// Run `f` with a thread-local debugging recorder installed and return its
/// result plus every counter it emitted.
///
/// Only metrics recorded on the calling thread are seen; work done by a
/// progress thread is not.
pub fn capture_metrics<R>(f: impl FnOnce() -> R) -> (R, Vec<CapturedMetric>) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let result = metrics::with_local_recorder(&recorder, f);
    let captured = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(value) => Some(CapturedMetric {
                name: key.key().name().to_owned(),
                labels: key
                    .key()
                    .labels()
                    .map(|label| (label.key().to_owned(), label.value().to_owned()))
                    .collect(),
                value,
            }),
            _ => None,
        })
        .collect();
    (result, captured)
}

/// Value of counter `name` carrying label `label`, or 0 if it was never
/// emitted.
#[must_use]
pub fn counter_value(metrics: &[CapturedMetric], name: &str, label: (&str, &str)) -> u64 {
    metrics
        .iter()
        .filter(|metric| {
            metric.name == name
                && metric
                    .labels
                    .iter()
                    .any(|(key, value)| key == label.0 && value == label.1)
        })
        .map(|metric| metric.value)
        .sum()
}
