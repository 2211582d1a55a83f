//! Resilient async JWKS provider pipeline: exclusive cache refresh, preemptive background
//! updates, token-bucket rate limiting, retry, and outage shadowing over a remote key set.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod bucket;
pub mod cache;
pub mod jwk;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod source;

mod error;
#[cfg(test)] mod testing;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
#[cfg(test)]
mod _test {
	use tracing_subscriber as _;
	use wiremock as _;
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	bucket::TokenBucket,
	cache::{
		entry::CacheEntry,
		manager::CachedJwksProvider,
		preemptive::PreemptiveCachedJwksProvider,
		state::{CacheState, CacheStatus},
	},
	error::{Error, ErrorKind, Result},
	jwk::{EllipticCurve, Jwk, KeySet},
	metrics::{PipelineMetrics, PipelineMetricsSnapshot},
	pipeline::{
		CacheSettings, JwkPipeline, JwkProviderBuilder, PipelineConfig, PipelineStatus,
		PreemptiveSettings, RateLimitSettings, ShadowSettings,
	},
	provider::{
		DefaultJwkProvider, JwkProvider, JwksProvider, outage::OutageCachedJwksProvider,
		rate_limited::RateLimitedJwksProvider, retrying::RetryingJwksProvider,
	},
	source::{
		decode_jwks,
		file::FileJwksProvider,
		remote::{HttpSettings, UrlJwksProvider},
	},
};
