//! Outage shadow: a long-lived copy of the last good key set served when the source is down.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
// self
use crate::{
	_prelude::*,
	cache::entry::CacheEntry,
	jwk::KeySet,
	metrics::{DEFAULT_PIPELINE, PipelineMetrics},
	provider::JwksProvider,
};

/// Serves the last successful key set while the wrapped provider reports `Unavailable`.
///
/// The shadow slot is independent of any cache layer above it and is refreshed on every
/// successful call.
#[derive(Debug)]
pub struct OutageCachedJwksProvider {
	inner: Arc<dyn JwksProvider>,
	ttl: Duration,
	shadow: ArcSwapOption<CacheEntry>,
	generations: AtomicU64,
	metrics: Arc<PipelineMetrics>,
}
impl OutageCachedJwksProvider {
	/// Wrap `inner` with a shadow copy kept for `ttl`.
	pub fn new(inner: Arc<dyn JwksProvider>, ttl: Duration) -> Self {
		Self::with_metrics(inner, ttl, PipelineMetrics::new(DEFAULT_PIPELINE))
	}

	/// Wrap `inner`, recording stale serves into `metrics`.
	pub fn with_metrics(
		inner: Arc<dyn JwksProvider>,
		ttl: Duration,
		metrics: Arc<PipelineMetrics>,
	) -> Self {
		Self {
			inner,
			ttl,
			shadow: ArcSwapOption::empty(),
			generations: AtomicU64::new(1),
			metrics,
		}
	}

	/// How long a shadow copy stays servable.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	fn store(&self, jwks: Arc<KeySet>) {
		let generation = self.generations.fetch_add(1, Ordering::Relaxed);

		self.shadow.store(Some(Arc::new(CacheEntry::new(
			jwks,
			Instant::now(),
			self.ttl,
			generation,
		))));
	}
}
#[async_trait]
impl JwksProvider for OutageCachedJwksProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		match self.inner.jwks().await {
			Ok(jwks) => {
				self.store(jwks.clone());

				Ok(jwks)
			},
			Err(err) if err.is_unavailable() => {
				let now = Instant::now();
				let Some(entry) = self.shadow.load_full().filter(|entry| entry.is_valid(now)) else {
					return Err(err);
				};

				tracing::warn!(
					pipeline = self.metrics.pipeline(),
					generation = entry.generation(),
					error = %err,
					"key source unavailable; serving shadow copy"
				);
				self.metrics.record_outage_serve();

				Ok(entry.jwks().clone())
			},
			Err(err) => Err(err),
		}
	}
}
