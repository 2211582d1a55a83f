//! Time-bounded key-set cache with an exclusive, timeout-bounded refresh.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::{sync::Mutex, time};
// self
use crate::{
	_prelude::*,
	cache::{entry::CacheEntry, state::CacheStatus},
	jwk::{Jwk, KeySet},
	metrics::{DEFAULT_PIPELINE, PipelineMetrics},
	provider::{self, JwkProvider, JwksProvider},
};

/// Generation reported for an empty slot.
pub(crate) const NO_GENERATION: u64 = 0;

/// Caches the key set of the wrapped provider for a fixed TTL.
///
/// Lookups served from a fresh entry never touch the wrapped provider. When the entry is
/// missing or stale, callers queue on a single refresh lock for at most `refresh_timeout`;
/// the first one fetches and publishes, the rest reuse what it published.
#[derive(Clone, Debug)]
pub struct CachedJwksProvider {
	core: Arc<CacheCore>,
}
impl CachedJwksProvider {
	/// Cache `inner` for `ttl`, waiting at most `refresh_timeout` for the refresh lock.
	pub fn new(inner: Arc<dyn JwksProvider>, ttl: Duration, refresh_timeout: Duration) -> Self {
		Self::with_metrics(inner, ttl, refresh_timeout, PipelineMetrics::new(DEFAULT_PIPELINE))
	}

	/// Same as [`CachedJwksProvider::new`], recording into `metrics`.
	pub fn with_metrics(
		inner: Arc<dyn JwksProvider>,
		ttl: Duration,
		refresh_timeout: Duration,
		metrics: Arc<PipelineMetrics>,
	) -> Self {
		Self {
			core: Arc::new(CacheCore {
				inner,
				ttl,
				refresh_timeout,
				slot: ArcSwapOption::empty(),
				refresh_lock: Mutex::new(()),
				generations: AtomicU64::new(NO_GENERATION + 1),
				metrics,
			}),
		}
	}

	/// Freshness window of a published entry.
	pub fn ttl(&self) -> Duration {
		self.core.ttl
	}

	/// Longest wait for the refresh lock.
	pub fn refresh_timeout(&self) -> Duration {
		self.core.refresh_timeout
	}

	/// Counters shared with the rest of the pipeline.
	pub fn metrics(&self) -> &Arc<PipelineMetrics> {
		&self.core.metrics
	}

	/// Capture the current slot for status reporting.
	pub fn status(&self) -> CacheStatus {
		self.core.status(false)
	}

	pub(crate) fn core(&self) -> &Arc<CacheCore> {
		&self.core
	}
}
#[async_trait]
impl JwksProvider for CachedJwksProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		self.core.jwks_with(|_, _| {}).await
	}
}
#[async_trait]
impl JwkProvider for CachedJwksProvider {
	async fn jwk(&self, kid: Option<&str>) -> Result<Jwk> {
		self.core.jwk_with(kid, |_, _| {}).await
	}
}

/// Shared state behind [`CachedJwksProvider`] and the preemptive refresh worker.
#[derive(Debug)]
pub(crate) struct CacheCore {
	inner: Arc<dyn JwksProvider>,
	ttl: Duration,
	refresh_timeout: Duration,
	slot: ArcSwapOption<CacheEntry>,
	refresh_lock: Mutex<()>,
	generations: AtomicU64,
	metrics: Arc<PipelineMetrics>,
}
impl CacheCore {
	pub(crate) fn current(&self) -> Option<Arc<CacheEntry>> {
		self.slot.load_full()
	}

	pub(crate) fn metrics(&self) -> &Arc<PipelineMetrics> {
		&self.metrics
	}

	pub(crate) fn status(&self, refresh_scheduled: bool) -> CacheStatus {
		let refreshing = self.refresh_lock.try_lock().is_err();

		CacheStatus::capture(self.current().as_deref(), refreshing, refresh_scheduled)
	}

	/// Serve the key set, calling `on_hit` whenever a fresh entry answers the lookup.
	pub(crate) async fn jwks_with<F>(&self, on_hit: F) -> Result<Arc<KeySet>>
	where
		F: FnOnce(Instant, &CacheEntry) + Send,
	{
		let now = Instant::now();
		let current = self.current();

		if let Some(entry) = &current
			&& entry.is_valid(now)
		{
			self.metrics.record_hit();
			on_hit(now, &**entry);

			return Ok(entry.jwks().clone());
		}

		self.metrics.record_miss();

		let entry = self.refresh(generation_of(current.as_deref())).await?;

		Ok(entry.jwks().clone())
	}

	/// Resolve `kid`, forcing one refresh when the id is missing from a fresh entry.
	pub(crate) async fn jwk_with<F>(&self, kid: Option<&str>, on_hit: F) -> Result<Jwk>
	where
		F: FnOnce(Instant, &CacheEntry) + Send,
	{
		let now = Instant::now();
		let current = self.current();

		if let Some(entry) = &current
			&& entry.is_valid(now)
		{
			if let Some(jwk) = entry.jwks().find(kid) {
				self.metrics.record_hit();
				on_hit(now, &**entry);

				return Ok(jwk.clone());
			}

			tracing::debug!(
				pipeline = self.metrics.pipeline(),
				kid = kid.unwrap_or_default(),
				generation = entry.generation(),
				"key id absent from cached key set; forcing refresh"
			);
		}

		self.metrics.record_miss();

		let entry = self.refresh(generation_of(current.as_deref())).await?;

		provider::lookup(entry.jwks(), kid)
	}

	/// Fetch and publish a new entry unless one newer than `observed` was published meanwhile.
	pub(crate) async fn refresh(&self, observed: u64) -> Result<Arc<CacheEntry>> {
		let _guard = match time::timeout(self.refresh_timeout, self.refresh_lock.lock()).await {
			Ok(guard) => guard,
			Err(_) => {
				self.metrics.record_refresh_timeout();

				tracing::warn!(
					pipeline = self.metrics.pipeline(),
					waited_ms = self.refresh_timeout.as_millis() as u64,
					"timed out waiting for the cache refresh lock"
				);

				return Err(Error::RefreshTimeout { waited: self.refresh_timeout });
			},
		};

		if let Some(entry) = self.current()
			&& entry.generation() != observed
			&& entry.is_valid(Instant::now())
		{
			tracing::debug!(
				pipeline = self.metrics.pipeline(),
				generation = entry.generation(),
				"reusing key set published while waiting for the refresh lock"
			);

			return Ok(entry);
		}

		let started = Instant::now();

		match self.inner.jwks().await {
			Ok(jwks) => {
				let generation = self.generations.fetch_add(1, Ordering::Relaxed);
				let entry = Arc::new(CacheEntry::new(jwks, Instant::now(), self.ttl, generation));

				self.slot.store(Some(entry.clone()));
				self.metrics.record_refresh_success(started.elapsed());

				tracing::debug!(
					pipeline = self.metrics.pipeline(),
					generation,
					keys = entry.jwks().len(),
					elapsed_ms = started.elapsed().as_millis() as u64,
					"published refreshed key set"
				);

				Ok(entry)
			},
			Err(err) => {
				self.metrics.record_refresh_error();

				tracing::warn!(
					pipeline = self.metrics.pipeline(),
					observed,
					error = %err,
					"key set refresh failed"
				);

				Err(err)
			},
		}
	}
}

pub(crate) fn generation_of(entry: Option<&CacheEntry>) -> u64 {
	entry.map(CacheEntry::generation).unwrap_or(NO_GENERATION)
}
