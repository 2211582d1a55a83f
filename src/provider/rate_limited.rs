//! Token-bucket gate in front of the upstream key source.

// crates.io
use async_trait::async_trait;
// self
use crate::{
	_prelude::*,
	bucket::TokenBucket,
	jwk::KeySet,
	metrics::{DEFAULT_PIPELINE, PipelineMetrics},
	provider::JwksProvider,
};

/// Rejects calls with [`Error::RateLimited`] once the bucket is empty.
#[derive(Clone, Debug)]
pub struct RateLimitedJwksProvider {
	inner: Arc<dyn JwksProvider>,
	bucket: Arc<TokenBucket>,
	metrics: Arc<PipelineMetrics>,
}
impl RateLimitedJwksProvider {
	/// Gate `inner` behind `bucket`.
	pub fn new(inner: Arc<dyn JwksProvider>, bucket: TokenBucket) -> Self {
		Self::with_metrics(inner, bucket, PipelineMetrics::new(DEFAULT_PIPELINE))
	}

	/// Gate `inner` behind `bucket`, recording rejections into `metrics`.
	pub fn with_metrics(
		inner: Arc<dyn JwksProvider>,
		bucket: TokenBucket,
		metrics: Arc<PipelineMetrics>,
	) -> Self {
		Self { inner, bucket: Arc::new(bucket), metrics }
	}

	/// Bucket gating upstream calls.
	pub fn bucket(&self) -> &TokenBucket {
		&self.bucket
	}
}
#[async_trait]
impl JwksProvider for RateLimitedJwksProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		if !self.bucket.consume(1)? {
			let retry_after = self.bucket.will_leak_in(1)?;

			tracing::warn!(
				pipeline = self.metrics.pipeline(),
				retry_after_ms = retry_after.as_millis() as u64,
				"key set fetch rejected by rate limiter"
			);
			self.metrics.record_rate_limited();

			return Err(Error::RateLimited { retry_after });
		}

		self.inner.jwks().await
	}
}
