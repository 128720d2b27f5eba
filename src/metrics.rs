//! Metrics helpers and per-client telemetry bookkeeping.
//!
//! The atomic [`ClientMetrics`] accumulator is always available and feeds
//! status/debug screens. Emission to a metrics backend is opt-in: the
//! `metrics` feature forwards counters and histograms to the `metrics` facade
//! and `prometheus` adds a default exporter.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
use crate::_prelude::*;

#[cfg(feature = "metrics")] type LabelSet = SmallVec<[Label; 4]>;

#[cfg(feature = "metrics")] const METRIC_REQUESTS_TOTAL: &str = "stride_client_requests_total";
#[cfg(feature = "metrics")]
const METRIC_REQUEST_DURATION: &str = "stride_client_request_duration_seconds";
#[cfg(feature = "metrics")]
const METRIC_AUTH_REFRESH_TOTAL: &str = "stride_client_auth_refresh_total";
#[cfg(feature = "metrics")]
const METRIC_OFFLINE_FALLBACK_TOTAL: &str = "stride_client_offline_fallback_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe telemetry accumulator for a single API client.
#[derive(Debug, Default)]
pub struct ClientMetrics {
	requests_total: AtomicU64,
	request_errors: AtomicU64,
	auth_refreshes: AtomicU64,
	auth_refresh_failures: AtomicU64,
	last_request_micros: AtomicU64,
}
impl ClientMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a completed request and its round-trip latency.
	pub fn record_request(&self, success: bool, duration: Duration) {
		self.requests_total.fetch_add(1, Ordering::Relaxed);
		if !success {
			self.request_errors.fetch_add(1, Ordering::Relaxed);
		}
		self.last_request_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a session refresh triggered by an authorization failure.
	pub fn record_auth_refresh(&self, success: bool) {
		self.auth_refreshes.fetch_add(1, Ordering::Relaxed);
		if !success {
			self.auth_refresh_failures.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> ClientMetricsSnapshot {
		ClientMetricsSnapshot {
			requests_total: self.requests_total.load(Ordering::Relaxed),
			request_errors: self.request_errors.load(Ordering::Relaxed),
			auth_refreshes: self.auth_refreshes.load(Ordering::Relaxed),
			auth_refresh_failures: self.auth_refresh_failures.load(Ordering::Relaxed),
			last_request_micros: match self.last_request_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-client telemetry counters.
#[derive(Clone, Debug)]
pub struct ClientMetricsSnapshot {
	/// Total number of requests issued.
	pub requests_total: u64,
	/// Count of requests that resolved to an error.
	pub request_errors: u64,
	/// Count of 401-triggered session refreshes.
	pub auth_refreshes: u64,
	/// Count of session refreshes that failed.
	pub auth_refresh_failures: u64,
	/// Microsecond latency of the most recent request.
	pub last_request_micros: Option<u64>,
}
impl ClientMetricsSnapshot {
	/// Ratio of failed requests over total requests.
	pub fn error_rate(&self) -> f64 {
		if self.requests_total == 0 {
			0.0
		} else {
			self.request_errors as f64 / self.requests_total as f64
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a completed request, tagged with its method and outcome class.
pub fn record_request(method: &str, outcome: &'static str, duration: Duration) {
	#[cfg(feature = "metrics")]
	{
		let labels = request_labels(method, outcome);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::histogram!(METRIC_REQUEST_DURATION, labels.iter())
			.record(duration.as_secs_f64());
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (method, outcome, duration);
}

/// Record a 401-triggered session refresh attempt and its outcome.
pub fn record_auth_refresh(outcome: &'static str) {
	#[cfg(feature = "metrics")]
	{
		let labels = single_label("outcome", outcome);

		metrics::counter!(METRIC_AUTH_REFRESH_TOTAL, labels.iter()).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = outcome;
}

/// Record a fetch cycle that degraded to its fallback value.
pub fn record_offline_fallback(reason: &'static str) {
	#[cfg(feature = "metrics")]
	{
		let labels = single_label("reason", reason);

		metrics::counter!(METRIC_OFFLINE_FALLBACK_TOTAL, labels.iter()).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = reason;
}

#[cfg(feature = "metrics")]
fn request_labels(method: &str, outcome: &'static str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("method", method.to_owned()));
	labels.push(Label::new("outcome", outcome));

	labels
}

#[cfg(feature = "metrics")]
fn single_label(key: &'static str, value: &'static str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new(key, value));

	labels
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn snapshot_reflects_recorded_activity() {
		let metrics = ClientMetrics::new();

		metrics.record_request(true, Duration::from_millis(20));
		metrics.record_request(false, Duration::from_millis(40));
		metrics.record_auth_refresh(true);
		metrics.record_auth_refresh(false);

		let snapshot = metrics.snapshot();

		assert_eq!(snapshot.requests_total, 2);
		assert_eq!(snapshot.request_errors, 1);
		assert_eq!(snapshot.auth_refreshes, 2);
		assert_eq!(snapshot.auth_refresh_failures, 1);
		assert_eq!(snapshot.last_request_micros, Some(40_000));
		assert!((snapshot.error_rate() - 0.5).abs() < f64::EPSILON);
	}

	#[test]
	fn empty_snapshot_has_no_latency_and_zero_error_rate() {
		let snapshot = ClientMetrics::new().snapshot();

		assert_eq!(snapshot.last_request_micros, None);
		assert!(snapshot.error_rate() < f64::EPSILON);
	}

	#[cfg(feature = "metrics")]
	mod facade {
		// std
		use std::borrow::Borrow;
		// crates.io
		use metrics_util::{
			CompositeKey, MetricKind,
			debugging::{DebugValue, DebuggingRecorder},
		};
		// self
		use super::super::*;

		fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
		where
			F: FnOnce(),
		{
			let recorder = DebuggingRecorder::new();
			let snapshotter = recorder.snapshotter();

			metrics::with_local_recorder(&recorder, f);

			snapshotter
				.snapshot()
				.into_vec()
				.into_iter()
				.map(|(key, _, _, value)| (key, value))
				.collect()
		}

		fn counter_value(
			snapshot: &[(CompositeKey, DebugValue)],
			name: &str,
			labels: &[(&str, &str)],
		) -> u64 {
			snapshot
				.iter()
				.find_map(|(key, value)| {
					(key.kind() == MetricKind::Counter
						&& Borrow::<str>::borrow(key.key().name()) == name
						&& labels_match(key, labels))
					.then(|| match value {
						DebugValue::Counter(value) => *value,
						_ => 0,
					})
				})
				.unwrap_or(0)
		}

		fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
			let mut labels: Vec<_> =
				key.key().labels().map(|label| (label.key(), label.value())).collect();

			labels.sort_unstable();

			let mut expected_sorted: Vec<_> = expected.to_vec();

			expected_sorted.sort_unstable();

			labels.len() == expected_sorted.len()
				&& labels
					.into_iter()
					.zip(expected_sorted.into_iter())
					.all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
		}

		#[test]
		fn records_request_and_fallback_counters() {
			let snapshot = capture_metrics(|| {
				record_request("GET", "success", Duration::from_millis(15));
				record_request("GET", "error", Duration::from_millis(15));
				record_auth_refresh("success");
				record_offline_fallback("exhausted");
			});

			assert_eq!(
				counter_value(
					&snapshot,
					"stride_client_requests_total",
					&[("method", "GET"), ("outcome", "success")]
				),
				1
			);
			assert_eq!(
				counter_value(
					&snapshot,
					"stride_client_requests_total",
					&[("method", "GET"), ("outcome", "error")]
				),
				1
			);
			assert_eq!(
				counter_value(
					&snapshot,
					"stride_client_auth_refresh_total",
					&[("outcome", "success")]
				),
				1
			);
			assert_eq!(
				counter_value(
					&snapshot,
					"stride_client_offline_fallback_total",
					&[("reason", "exhausted")]
				),
				1
			);
		}
	}
}
