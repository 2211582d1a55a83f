//! Metrics helpers and per-pipeline telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

/// Label applied when a layer is built without an explicit pipeline name.
pub const DEFAULT_PIPELINE: &str = "jwks";

const METRIC_REQUESTS_TOTAL: &str = "jwks_requests_total";
const METRIC_HITS_TOTAL: &str = "jwks_cache_hits_total";
const METRIC_MISSES_TOTAL: &str = "jwks_cache_misses_total";
const METRIC_REFRESH_TOTAL: &str = "jwks_refresh_total";
const METRIC_REFRESH_DURATION: &str = "jwks_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "jwks_refresh_errors_total";
const METRIC_REFRESH_TIMEOUTS: &str = "jwks_refresh_timeouts_total";
const METRIC_PREEMPTIVE_TOTAL: &str = "jwks_preemptive_refresh_total";
const METRIC_RATE_LIMITED_TOTAL: &str = "jwks_rate_limited_total";
const METRIC_RETRIES_TOTAL: &str = "jwks_retries_total";
const METRIC_OUTAGE_SERVES_TOTAL: &str = "jwks_outage_serves_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe counters shared by every layer of one pipeline.
#[derive(Debug)]
pub struct PipelineMetrics {
	pipeline: Arc<str>,
	labels: LabelSet,
	success_labels: LabelSet,
	error_labels: LabelSet,
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	refresh_timeouts: AtomicU64,
	preemptive_refreshes: AtomicU64,
	rate_limited: AtomicU64,
	retries: AtomicU64,
	outage_serves: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl PipelineMetrics {
	/// Create a new accumulator labelled with the pipeline name.
	pub fn new(pipeline: impl Into<Arc<str>>) -> Arc<Self> {
		let pipeline = pipeline.into();
		let labels = base_labels(&pipeline);

		Arc::new(Self {
			success_labels: with_status(&labels, "success"),
			error_labels: with_status(&labels, "error"),
			labels,
			pipeline,
			total_requests: AtomicU64::new(0),
			cache_hits: AtomicU64::new(0),
			refresh_successes: AtomicU64::new(0),
			refresh_errors: AtomicU64::new(0),
			refresh_timeouts: AtomicU64::new(0),
			preemptive_refreshes: AtomicU64::new(0),
			rate_limited: AtomicU64::new(0),
			retries: AtomicU64::new(0),
			outage_serves: AtomicU64::new(0),
			last_refresh_micros: AtomicU64::new(0),
		})
	}

	/// Pipeline label attached to emitted metrics.
	pub fn pipeline(&self) -> &str {
		&self.pipeline
	}

	/// Record a lookup answered from the cache.
	pub fn record_hit(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.cache_hits.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REQUESTS_TOTAL, self.labels.iter()).increment(1);
		metrics::counter!(METRIC_HITS_TOTAL, self.labels.iter()).increment(1);
	}

	/// Record a lookup that had to descend below the cache.
	pub fn record_miss(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REQUESTS_TOTAL, self.labels.iter()).increment(1);
		metrics::counter!(METRIC_MISSES_TOTAL, self.labels.iter()).increment(1);
	}

	/// Record a successful refresh and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);

		metrics::counter!(METRIC_REFRESH_TOTAL, self.success_labels.iter()).increment(1);
		metrics::histogram!(METRIC_REFRESH_DURATION, self.labels.iter())
			.record(duration.as_secs_f64());
	}

	/// Record a refresh whose fetch failed.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REFRESH_TOTAL, self.error_labels.iter()).increment(1);
		metrics::counter!(METRIC_REFRESH_ERRORS, self.labels.iter()).increment(1);
	}

	/// Record a caller that gave up waiting for the refresh lock.
	pub fn record_refresh_timeout(&self) {
		self.refresh_timeouts.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REFRESH_TIMEOUTS, self.labels.iter()).increment(1);
	}

	/// Record a background refresh handed to the preemptive worker.
	pub fn record_preemptive_scheduled(&self) {
		self.preemptive_refreshes.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_PREEMPTIVE_TOTAL, self.labels.iter()).increment(1);
	}

	/// Record a call rejected by the token bucket.
	pub fn record_rate_limited(&self) {
		self.rate_limited.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_RATE_LIMITED_TOTAL, self.labels.iter()).increment(1);
	}

	/// Record a retry after a transient failure.
	pub fn record_retry(&self) {
		self.retries.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_RETRIES_TOTAL, self.labels.iter()).increment(1);
	}

	/// Record a stale snapshot served by the outage shadow.
	pub fn record_outage_serve(&self) {
		self.outage_serves.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_OUTAGE_SERVES_TOTAL, self.labels.iter()).increment(1);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> PipelineMetricsSnapshot {
		PipelineMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			refresh_timeouts: self.refresh_timeouts.load(Ordering::Relaxed),
			preemptive_refreshes: self.preemptive_refreshes.load(Ordering::Relaxed),
			rate_limited: self.rate_limited.load(Ordering::Relaxed),
			retries: self.retries.load(Ordering::Relaxed),
			outage_serves: self.outage_serves.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-pipeline counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PipelineMetricsSnapshot {
	/// Lookups observed by the cache layer.
	pub total_requests: u64,
	/// Lookups answered from the cache.
	pub cache_hits: u64,
	/// Refreshes that published a new snapshot.
	pub refresh_successes: u64,
	/// Refreshes whose fetch failed.
	pub refresh_errors: u64,
	/// Callers that timed out waiting for the refresh lock.
	pub refresh_timeouts: u64,
	/// Background refreshes scheduled ahead of expiry.
	pub preemptive_refreshes: u64,
	/// Calls rejected by the rate limiter.
	pub rate_limited: u64,
	/// Retries issued after transient failures.
	pub retries: u64,
	/// Stale snapshots served during outages.
	pub outage_serves: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
}
impl PipelineMetricsSnapshot {
	/// Ratio of cache hits over observed lookups.
	pub fn hit_rate(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.cache_hits as f64 / self.total_requests as f64
		}
	}
}

// Label values point at the shared pipeline name; cloning one never copies the string.
fn base_labels(pipeline: &Arc<str>) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("pipeline", pipeline.clone()));

	labels
}

fn with_status(base: &LabelSet, status: &'static str) -> LabelSet {
	let mut labels = base.clone();

	labels.push(Label::new("status", status));

	labels
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
