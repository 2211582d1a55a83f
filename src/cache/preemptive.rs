//! Cache layer that refreshes in the background shortly before the published entry expires.
//!
//! Lookups inside the lead window still return the current entry immediately. At most one
//! background refresh is scheduled per published generation: a fingerprint records the
//! generation already handed to the worker, and a try-once attempt lock keeps concurrent
//! callers from scheduling twice.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::CacheEntry,
		manager::{CacheCore, CachedJwksProvider, NO_GENERATION},
		state::CacheStatus,
	},
	jwk::{Jwk, KeySet},
	metrics::{DEFAULT_PIPELINE, PipelineMetrics},
	provider::{JwkProvider, JwksProvider},
};

const REFRESH_QUEUE_CAPACITY: usize = 4;

/// [`CachedJwksProvider`] plus non-blocking refresh ahead of expiry.
#[derive(Clone, Debug)]
pub struct PreemptiveCachedJwksProvider {
	cache: CachedJwksProvider,
	lead_time: Duration,
	scheduler: Arc<Scheduler>,
}
impl PreemptiveCachedJwksProvider {
	/// Cache `inner` for `ttl`, refreshing in the background once within `lead_time` of expiry.
	pub fn new(
		inner: Arc<dyn JwksProvider>,
		ttl: Duration,
		refresh_timeout: Duration,
		lead_time: Duration,
	) -> Self {
		Self::with_metrics(
			inner,
			ttl,
			refresh_timeout,
			lead_time,
			PipelineMetrics::new(DEFAULT_PIPELINE),
		)
	}

	/// Same as [`PreemptiveCachedJwksProvider::new`], recording into `metrics`.
	pub fn with_metrics(
		inner: Arc<dyn JwksProvider>,
		ttl: Duration,
		refresh_timeout: Duration,
		lead_time: Duration,
		metrics: Arc<PipelineMetrics>,
	) -> Self {
		Self {
			cache: CachedJwksProvider::with_metrics(inner, ttl, refresh_timeout, metrics),
			lead_time,
			scheduler: Arc::new(Scheduler {
				fingerprint: Arc::new(AtomicU64::new(NO_GENERATION)),
				attempt: Mutex::new(()),
				queue: Mutex::new(None),
			}),
		}
	}

	/// How long before expiry a background refresh is scheduled.
	pub fn lead_time(&self) -> Duration {
		self.lead_time
	}

	/// Underlying blocking cache.
	pub fn cache(&self) -> &CachedJwksProvider {
		&self.cache
	}

	/// Capture the current slot for status reporting.
	pub fn status(&self) -> CacheStatus {
		let core = self.cache.core();
		let scheduled = core.current().is_some_and(|entry| {
			self.scheduler.fingerprint.load(Ordering::Acquire) >= entry.generation()
		});

		core.status(scheduled)
	}

	fn on_hit(&self, now: Instant, entry: &CacheEntry) {
		if entry.expires_within(now, self.lead_time) {
			self.schedule(entry.generation());
		}
	}

	fn schedule(&self, generation: u64) {
		let scheduler = &self.scheduler;

		if scheduler.fingerprint.load(Ordering::Acquire) >= generation {
			return;
		}

		let Some(_attempt) = scheduler.attempt.try_lock() else {
			return;
		};

		if scheduler.fingerprint.load(Ordering::Acquire) >= generation {
			return;
		}

		scheduler.fingerprint.store(generation, Ordering::Release);

		let core = self.cache.core();
		let metrics = core.metrics();

		match scheduler.sender(core).try_send(RefreshJob { observed: generation }) {
			Ok(()) => {
				metrics.record_preemptive_scheduled();

				tracing::debug!(
					pipeline = metrics.pipeline(),
					generation,
					"scheduled preemptive key set refresh"
				);
			},
			Err(err) => {
				let _ = scheduler.fingerprint.compare_exchange(
					generation,
					NO_GENERATION,
					Ordering::AcqRel,
					Ordering::Acquire,
				);

				tracing::warn!(
					pipeline = metrics.pipeline(),
					generation,
					error = %err,
					"preemptive refresh queue rejected job"
				);
			},
		}
	}
}
#[async_trait]
impl JwksProvider for PreemptiveCachedJwksProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		self.cache.core().jwks_with(|now, entry| self.on_hit(now, entry)).await
	}
}
#[async_trait]
impl JwkProvider for PreemptiveCachedJwksProvider {
	async fn jwk(&self, kid: Option<&str>) -> Result<Jwk> {
		self.cache.core().jwk_with(kid, |now, entry| self.on_hit(now, entry)).await
	}
}

#[derive(Debug)]
struct Scheduler {
	// Generation whose refresh is queued or running; `NO_GENERATION` when idle.
	fingerprint: Arc<AtomicU64>,
	attempt: Mutex<()>,
	queue: Mutex<Option<mpsc::Sender<RefreshJob>>>,
}
impl Scheduler {
	/// Sender for a live worker, spawning one on the current runtime when none is running.
	///
	/// A worker stops when its runtime shuts down or a refresh panics; the next job then
	/// starts a replacement.
	fn sender(&self, core: &Arc<CacheCore>) -> mpsc::Sender<RefreshJob> {
		let mut queue = self.queue.lock();

		if let Some(sender) = queue.as_ref()
			&& !sender.is_closed()
		{
			return sender.clone();
		}
		if queue.is_some() {
			tracing::debug!(
				pipeline = core.metrics().pipeline(),
				"preemptive refresh worker stopped; starting a new one"
			);
		}

		let (sender, receiver) = mpsc::channel(REFRESH_QUEUE_CAPACITY);

		tokio::spawn(run_worker(core.clone(), self.fingerprint.clone(), receiver));
		*queue = Some(sender.clone());

		sender
	}
}

#[derive(Debug)]
struct RefreshJob {
	observed: u64,
}

/// Single background worker; exits once the owning provider and its clones are dropped.
async fn run_worker(
	core: Arc<CacheCore>,
	fingerprint: Arc<AtomicU64>,
	mut jobs: mpsc::Receiver<RefreshJob>,
) {
	while let Some(job) = jobs.recv().await {
		let mut in_flight =
			InFlight { fingerprint: &fingerprint, observed: job.observed, published: false };

		match core.refresh(job.observed).await {
			Ok(_) => in_flight.published = true,
			Err(err) => tracing::debug!(
				pipeline = core.metrics().pipeline(),
				generation = job.observed,
				error = %err,
				"preemptive refresh failed; will retry on a later lookup"
			),
		}
	}
}

// Clears the fingerprint unless the job published a new entry, even if the job never finishes.
struct InFlight<'a> {
	fingerprint: &'a AtomicU64,
	observed: u64,
	published: bool,
}
impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		if self.published {
			return;
		}

		let _ = self.fingerprint.compare_exchange(
			self.observed,
			NO_GENERATION,
			Ordering::AcqRel,
			Ordering::Acquire,
		);
	}
}
