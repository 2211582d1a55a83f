//! Decorator masking a single transient failure.

// crates.io
use async_trait::async_trait;
// self
use crate::{
	_prelude::*,
	jwk::KeySet,
	metrics::{DEFAULT_PIPELINE, PipelineMetrics},
	provider::JwksProvider,
};

/// Retries the wrapped provider exactly once after a transient failure.
///
/// Malformed documents and empty key sets are returned as-is.
#[derive(Clone, Debug)]
pub struct RetryingJwksProvider {
	inner: Arc<dyn JwksProvider>,
	metrics: Arc<PipelineMetrics>,
}
impl RetryingJwksProvider {
	/// Wrap `inner`.
	pub fn new(inner: Arc<dyn JwksProvider>) -> Self {
		Self::with_metrics(inner, PipelineMetrics::new(DEFAULT_PIPELINE))
	}

	/// Wrap `inner`, recording retries into `metrics`.
	pub fn with_metrics(inner: Arc<dyn JwksProvider>, metrics: Arc<PipelineMetrics>) -> Self {
		Self { inner, metrics }
	}
}
#[async_trait]
impl JwksProvider for RetryingJwksProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		match self.inner.jwks().await {
			Err(err) if err.is_transient() => {
				tracing::warn!(
					pipeline = self.metrics.pipeline(),
					error = %err,
					"key set fetch failed; retrying once"
				);
				self.metrics.record_retry();

				self.inner.jwks().await
			},
			result => result,
		}
	}
}
