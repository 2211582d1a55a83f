//! Pipeline configuration, builder, and the composed lookup surface.

// crates.io
use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	bucket::TokenBucket,
	cache::{
		manager::CachedJwksProvider, preemptive::PreemptiveCachedJwksProvider, state::CacheStatus,
	},
	jwk::{Jwk, KeySet},
	metrics::{DEFAULT_PIPELINE, PipelineMetrics, PipelineMetricsSnapshot},
	provider::{
		DefaultJwkProvider, JwkProvider, JwksProvider, outage::OutageCachedJwksProvider,
		rate_limited::RateLimitedJwksProvider, retrying::RetryingJwksProvider,
	},
	source::remote::{self, HttpSettings, UrlJwksProvider},
};

/// Default freshness window of the cache layer.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60 * 60);
/// Default wait for the cache refresh lock.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);
/// Default token bucket capacity.
pub const DEFAULT_BUCKET_CAPACITY: u32 = 10;
/// Default tokens added per refill period.
pub const DEFAULT_BUCKET_RATE: u32 = 1;
/// Default token bucket refill period.
pub const DEFAULT_BUCKET_PERIOD: Duration = Duration::from_secs(60);
/// Default lead time of preemptive refreshes.
pub const DEFAULT_PREEMPTIVE_LEAD_TIME: Duration = Duration::from_secs(15);
/// Shadow TTL multiplier applied to the cache TTL when no explicit shadow TTL is set.
pub const SHADOW_TTL_FACTOR: u32 = 10;

/// Cache layer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
	/// Whether lookups are cached.
	pub enabled: bool,
	/// Freshness window of a published key set.
	pub ttl: Duration,
	/// Longest wait for the refresh lock before failing with `RefreshTimeout`.
	pub refresh_timeout: Duration,
}
impl Default for CacheSettings {
	fn default() -> Self {
		Self { enabled: true, ttl: DEFAULT_CACHE_TTL, refresh_timeout: DEFAULT_REFRESH_TIMEOUT }
	}
}

/// Rate limiter settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
	/// Whether upstream fetches are rate limited.
	pub enabled: bool,
	/// Maximum burst of upstream fetches.
	pub capacity: u32,
	/// Tokens added per `period`.
	pub rate: u32,
	/// Refill period.
	pub period: Duration,
}
impl Default for RateLimitSettings {
	fn default() -> Self {
		Self {
			enabled: true,
			capacity: DEFAULT_BUCKET_CAPACITY,
			rate: DEFAULT_BUCKET_RATE,
			period: DEFAULT_BUCKET_PERIOD,
		}
	}
}

/// Outage shadow settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
	/// Whether the last good key set is served during outages.
	pub enabled: bool,
	/// How long the shadow copy stays servable; defaults to ten times the cache TTL.
	pub ttl: Option<Duration>,
}
impl ShadowSettings {
	/// Shadow TTL in effect for a pipeline caching for `cache_ttl`.
	pub fn effective_ttl(&self, cache_ttl: Duration) -> Duration {
		self.ttl.unwrap_or_else(|| cache_ttl.saturating_mul(SHADOW_TTL_FACTOR))
	}
}

/// Preemptive refresh settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreemptiveSettings {
	/// Whether the cache refreshes in the background ahead of expiry.
	pub enabled: bool,
	/// How long before expiry a background refresh is scheduled.
	pub lead_time: Duration,
}
impl Default for PreemptiveSettings {
	fn default() -> Self {
		Self { enabled: false, lead_time: DEFAULT_PREEMPTIVE_LEAD_TIME }
	}
}

/// Full pipeline configuration; every field falls back to its default when omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
	/// Cache layer.
	pub cache: CacheSettings,
	/// Rate limiter guarding the cache's upstream calls.
	pub rate_limit: RateLimitSettings,
	/// Retry one transient source failure.
	pub retrying: bool,
	/// Outage shadow.
	pub shadow: ShadowSettings,
	/// Preemptive background refresh.
	pub preemptive: PreemptiveSettings,
	/// HTTP source settings; ignored for custom sources.
	pub http: HttpSettings,
}
impl PipelineConfig {
	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if !self.cache.enabled && self.rate_limit.enabled {
			return Err(Error::Validation {
				field: "rate_limit.enabled",
				reason: "Rate limiting requires the cache layer to be enabled.".into(),
			});
		}
		if !self.cache.enabled && self.preemptive.enabled {
			return Err(Error::Validation {
				field: "preemptive.enabled",
				reason: "Preemptive refresh requires the cache layer to be enabled.".into(),
			});
		}
		if self.cache.enabled {
			if self.cache.ttl.is_zero() {
				return Err(Error::Validation {
					field: "cache.ttl",
					reason: "Must be greater than zero.".into(),
				});
			}
			if self.cache.refresh_timeout.is_zero() {
				return Err(Error::Validation {
					field: "cache.refresh_timeout",
					reason: "Must be greater than zero.".into(),
				});
			}
		}
		if self.rate_limit.enabled {
			TokenBucket::new(self.rate_limit.capacity, self.rate_limit.rate, self.rate_limit.period)?;
		}
		if self.shadow.enabled && self.shadow.effective_ttl(self.cache.ttl).is_zero() {
			return Err(Error::Validation {
				field: "shadow.ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.preemptive.enabled {
			if self.preemptive.lead_time.is_zero() {
				return Err(Error::Validation {
					field: "preemptive.lead_time",
					reason: "Must be greater than zero.".into(),
				});
			}
			if self.preemptive.lead_time >= self.cache.ttl {
				return Err(Error::Validation {
					field: "preemptive.lead_time",
					reason: "Must be less than cache.ttl.".into(),
				});
			}
		}

		self.http.validate()
	}
}

#[derive(Clone, Debug)]
enum Source {
	Url(Url),
	Provider(Arc<dyn JwksProvider>),
}

/// Fluent builder composing a [`JwkPipeline`].
///
/// Caching and rate limiting start enabled; retry, shadowing, and preemptive refresh start
/// disabled.
#[derive(Clone, Debug)]
pub struct JwkProviderBuilder {
	source: Source,
	config: PipelineConfig,
	name: Option<String>,
}
impl JwkProviderBuilder {
	/// Fetch keys from the JWKS endpoint at `url`.
	pub fn new(url: Url) -> Self {
		Self::with_source(Source::Url(url))
	}

	/// Fetch keys from `{domain}/.well-known/jwks.json`; bare domains default to `https://`.
	pub fn for_domain(domain: &str) -> Result<Self> {
		Ok(Self::new(remote::url_for_domain(domain)?))
	}

	/// Fetch keys from a custom source.
	pub fn from_provider(provider: Arc<dyn JwksProvider>) -> Self {
		Self::with_source(Source::Provider(provider))
	}

	fn with_source(source: Source) -> Self {
		Self { source, config: PipelineConfig::default(), name: None }
	}

	/// Replace the whole configuration.
	pub fn config(mut self, config: PipelineConfig) -> Self {
		self.config = config;

		self
	}

	/// Label used for logs and metrics; defaults to the endpoint host.
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());

		self
	}

	/// Toggle the cache layer.
	pub fn cached(mut self, enabled: bool) -> Self {
		self.config.cache.enabled = enabled;

		self
	}

	/// Enable caching with the given TTL.
	pub fn cached_for(mut self, ttl: Duration) -> Self {
		self.config.cache.enabled = true;
		self.config.cache.ttl = ttl;

		self
	}

	/// Bound the wait for the cache refresh lock.
	pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
		self.config.cache.refresh_timeout = timeout;

		self
	}

	/// Toggle the rate limiter.
	pub fn rate_limited(mut self, enabled: bool) -> Self {
		self.config.rate_limit.enabled = enabled;

		self
	}

	/// Enable rate limiting with a bucket of `capacity` tokens refilled at `rate` per `period`.
	pub fn rate_limited_to(mut self, capacity: u32, rate: u32, period: Duration) -> Self {
		self.config.rate_limit = RateLimitSettings { enabled: true, capacity, rate, period };

		self
	}

	/// Toggle the single retry of transient failures.
	pub fn retrying(mut self, enabled: bool) -> Self {
		self.config.retrying = enabled;

		self
	}

	/// Toggle the outage shadow.
	pub fn shadowed(mut self, enabled: bool) -> Self {
		self.config.shadow.enabled = enabled;

		self
	}

	/// Enable the outage shadow with an explicit TTL.
	pub fn shadowed_for(mut self, ttl: Duration) -> Self {
		self.config.shadow = ShadowSettings { enabled: true, ttl: Some(ttl) };

		self
	}

	/// Toggle preemptive background refresh.
	pub fn preemptive(mut self, enabled: bool) -> Self {
		self.config.preemptive.enabled = enabled;

		self
	}

	/// Enable preemptive refresh with the given lead time.
	pub fn preemptive_lead_time(mut self, lead_time: Duration) -> Self {
		self.config.preemptive = PreemptiveSettings { enabled: true, lead_time };

		self
	}

	/// HTTP connect timeout.
	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.config.http.connect_timeout = timeout;

		self
	}

	/// HTTP per-request timeout.
	pub fn read_timeout(mut self, timeout: Duration) -> Self {
		self.config.http.read_timeout = Some(timeout);

		self
	}

	/// Send an extra request header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.http.headers.insert(name.into(), value.into());

		self
	}

	/// Route requests through a proxy.
	pub fn proxy(mut self, proxy: Url) -> Self {
		self.config.http.proxy = Some(proxy);

		self
	}

	/// Reject JWKS payloads larger than `bytes`.
	pub fn max_response_bytes(mut self, bytes: u64) -> Self {
		self.config.http.max_response_bytes = bytes;

		self
	}

	/// Validate the configuration and compose the pipeline.
	///
	/// Layers are stacked outer to inner as cache (or preemptive cache), rate limiter, outage
	/// shadow, retry, source.
	pub fn build(self) -> Result<JwkPipeline> {
		let Self { source, config, name } = self;

		config.validate()?;

		let name: Arc<str> = match (name, &source) {
			(Some(name), _) => name.into(),
			(None, Source::Url(url)) => url.host_str().unwrap_or(DEFAULT_PIPELINE).into(),
			(None, Source::Provider(_)) => DEFAULT_PIPELINE.into(),
		};
		let metrics = PipelineMetrics::new(name.clone());
		let mut provider: Arc<dyn JwksProvider> = match source {
			Source::Url(url) => Arc::new(UrlJwksProvider::with_settings(url, &config.http)?),
			Source::Provider(provider) => provider,
		};

		if config.retrying {
			provider = Arc::new(RetryingJwksProvider::with_metrics(provider, metrics.clone()));
		}
		if config.shadow.enabled {
			provider = Arc::new(OutageCachedJwksProvider::with_metrics(
				provider,
				config.shadow.effective_ttl(config.cache.ttl),
				metrics.clone(),
			));
		}
		if config.rate_limit.enabled {
			let RateLimitSettings { capacity, rate, period, .. } = config.rate_limit;

			provider = Arc::new(RateLimitedJwksProvider::with_metrics(
				provider,
				TokenBucket::new(capacity, rate, period)?,
				metrics.clone(),
			));
		}

		let front = match (config.cache.enabled, config.preemptive.enabled) {
			(false, _) => Front::Direct(DefaultJwkProvider::new(provider)),
			(true, false) => Front::Cached(CachedJwksProvider::with_metrics(
				provider,
				config.cache.ttl,
				config.cache.refresh_timeout,
				metrics.clone(),
			)),
			(true, true) => Front::Preemptive(PreemptiveCachedJwksProvider::with_metrics(
				provider,
				config.cache.ttl,
				config.cache.refresh_timeout,
				config.preemptive.lead_time,
				metrics.clone(),
			)),
		};

		tracing::debug!(
			pipeline = %name,
			cached = config.cache.enabled,
			preemptive = config.preemptive.enabled,
			rate_limited = config.rate_limit.enabled,
			shadowed = config.shadow.enabled,
			retrying = config.retrying,
			"jwks pipeline built"
		);

		Ok(JwkPipeline { name, config, front, metrics })
	}
}

#[derive(Clone, Debug)]
enum Front {
	Direct(DefaultJwkProvider),
	Cached(CachedJwksProvider),
	Preemptive(PreemptiveCachedJwksProvider),
}
impl Front {
	fn as_jwks(&self) -> &dyn JwksProvider {
		match self {
			Self::Direct(provider) => provider,
			Self::Cached(provider) => provider,
			Self::Preemptive(provider) => provider,
		}
	}

	fn as_jwk(&self) -> &dyn JwkProvider {
		match self {
			Self::Direct(provider) => provider,
			Self::Cached(provider) => provider,
			Self::Preemptive(provider) => provider,
		}
	}
}
/// Composed key lookup pipeline.
#[derive(Clone, Debug)]
pub struct JwkPipeline {
	name: Arc<str>,
	config: PipelineConfig,
	front: Front,
	metrics: Arc<PipelineMetrics>,
}
impl JwkPipeline {
	/// Label used for logs and metrics.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Configuration the pipeline was built from.
	pub fn config(&self) -> &PipelineConfig {
		&self.config
	}

	/// Counters shared by every layer.
	pub fn metrics(&self) -> &Arc<PipelineMetrics> {
		&self.metrics
	}

	/// Resolve the key for `kid`.
	///
	/// Fails with `NotFound`, `Unavailable`, or `RateLimited`; see [`Error::kind`].
	#[tracing::instrument(skip(self), fields(pipeline = %self.name))]
	pub async fn get(&self, kid: Option<&str>) -> Result<Jwk> {
		self.front.as_jwk().jwk(kid).await
	}

	/// Return the whole current key set.
	#[tracing::instrument(skip(self), fields(pipeline = %self.name))]
	pub async fn get_all(&self) -> Result<Arc<KeySet>> {
		self.front.as_jwks().jwks().await
	}

	/// Resolve `kid` and rebuild its public key for signature verification.
	pub async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
		self.get(kid).await?.decoding_key()
	}

	/// Capture cache state and counters.
	pub fn status(&self) -> PipelineStatus {
		let cache = match &self.front {
			Front::Direct(_) => None,
			Front::Cached(provider) => Some(provider.status()),
			Front::Preemptive(provider) => Some(provider.status()),
		};

		PipelineStatus { name: self.name.to_string(), cache, metrics: self.metrics.snapshot() }
	}
}
#[async_trait]
impl JwksProvider for JwkPipeline {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		self.get_all().await
	}
}
#[async_trait]
impl JwkProvider for JwkPipeline {
	async fn jwk(&self, kid: Option<&str>) -> Result<Jwk> {
		self.get(kid).await
	}
}

/// Point-in-time view of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
	/// Pipeline label.
	pub name: String,
	/// Cache state, absent when caching is disabled.
	pub cache: Option<CacheStatus>,
	/// Counters at capture time.
	pub metrics: PipelineMetricsSnapshot,
}
