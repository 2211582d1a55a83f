//! End-to-end pipeline behaviour built through the public builder.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use jwks_provider::{CacheState, ErrorKind, JwkProviderBuilder, Result};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::{self, JWKS_BODY, JWKS_PATH, ROTATED_BODY};

#[tokio::test]
async fn caches_keys_after_initial_fetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(support::json(JWKS_BODY))
		.expect(1)
		.mount(&server)
		.await;

	let pipeline = JwkProviderBuilder::new(support::jwks_url(&server)).build()?;
	let first = pipeline.get_all().await?;
	let key = pipeline.get(Some("primary")).await?;
	let second = pipeline.get_all().await?;

	assert_eq!(key.algorithm(), Some("RS256"));
	assert!(Arc::ptr_eq(&first, &second));
	assert!(pipeline.decoding_key(Some("primary")).await.is_ok());

	let status = pipeline.status();

	assert_eq!(status.name, "127.0.0.1");
	assert_eq!(status.cache.map(|cache| cache.state), Some(CacheState::Ready));
	assert_eq!(status.metrics.cache_hits, 3);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn resolves_bare_domains_to_the_well_known_path() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(support::json(JWKS_BODY))
		.expect(1)
		.mount(&server)
		.await;

	let pipeline = JwkProviderBuilder::for_domain(&format!("{}/tenant/path", server.uri()))?
		.name("domain")
		.build()?;

	assert_eq!(pipeline.get(None).await?.id(), Some("primary"));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn unknown_key_ids_trigger_one_refetch() -> Result<()> {
	let server = MockServer::start().await;

	support::respond_times(&server, support::json(JWKS_BODY), 1).await;
	support::respond_times(&server, support::json(ROTATED_BODY), 2).await;

	let pipeline = JwkProviderBuilder::new(support::jwks_url(&server)).build()?;

	pipeline.get(Some("primary")).await?;

	assert_eq!(pipeline.get(Some("rotated")).await?.key_type(), "EC");
	assert_eq!(support::requests(&server).await, 2);

	let missing = pipeline.get(Some("unknown")).await.unwrap_err();

	assert_eq!(missing.kind(), ErrorKind::NotFound);
	assert_eq!(support::requests(&server).await, 3);
	Ok(())
}

#[tokio::test]
async fn retries_a_transient_failure() -> Result<()> {
	let server = MockServer::start().await;

	support::respond_times(&server, ResponseTemplate::new(502), 1).await;
	support::respond_times(&server, support::json(JWKS_BODY), 1).await;

	let pipeline = JwkProviderBuilder::new(support::jwks_url(&server)).retrying(true).build()?;

	assert_eq!(pipeline.get_all().await?.len(), 1);
	assert_eq!(support::requests(&server).await, 2);
	assert_eq!(pipeline.status().metrics.retries, 1);
	Ok(())
}

#[tokio::test]
async fn serves_the_shadow_copy_during_an_outage() -> Result<()> {
	let server = MockServer::start().await;

	support::respond_times(&server, support::json(JWKS_BODY), 1).await;
	support::respond_times(&server, ResponseTemplate::new(500), 10).await;

	let pipeline = JwkProviderBuilder::new(support::jwks_url(&server))
		.cached_for(Duration::from_millis(100))
		.shadowed_for(Duration::from_secs(60))
		.build()?;
	let fresh = pipeline.get_all().await?;

	tokio::time::sleep(Duration::from_millis(150)).await;

	let stale = pipeline.get_all().await?;

	assert!(Arc::ptr_eq(&fresh, &stale));
	assert_eq!(pipeline.status().metrics.outage_serves, 1);
	Ok(())
}

#[tokio::test]
async fn outages_surface_without_a_shadow() -> Result<()> {
	let server = MockServer::start().await;

	support::respond_times(&server, ResponseTemplate::new(500), 10).await;

	let pipeline = JwkProviderBuilder::new(support::jwks_url(&server)).build()?;
	let err = pipeline.get(Some("primary")).await.unwrap_err();

	assert_eq!(err.kind(), ErrorKind::Unavailable);
	assert_eq!(pipeline.status().cache.map(|cache| cache.state), Some(CacheState::Empty));
	Ok(())
}

#[tokio::test]
async fn rate_limits_refreshes_of_an_expired_cache() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(support::json(JWKS_BODY))
		.expect(1)
		.mount(&server)
		.await;

	let pipeline = JwkProviderBuilder::new(support::jwks_url(&server))
		.cached_for(Duration::from_millis(50))
		.rate_limited_to(1, 1, Duration::from_secs(60))
		.build()?;

	pipeline.get_all().await?;
	tokio::time::sleep(Duration::from_millis(100)).await;

	let err = pipeline.get_all().await.unwrap_err();
	let retry_after = err.retry_after().expect("retry hint");

	assert_eq!(err.kind(), ErrorKind::RateLimited);
	assert!(retry_after > Duration::from_secs(59) && retry_after <= Duration::from_secs(60));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn refreshes_ahead_of_expiry_without_blocking() -> Result<()> {
	let server = MockServer::start().await;

	support::respond_times(&server, support::json(JWKS_BODY), 1).await;
	support::respond_times(&server, support::json(ROTATED_BODY), 5).await;

	let pipeline = JwkProviderBuilder::new(support::jwks_url(&server))
		.cached_for(Duration::from_secs(30))
		.preemptive_lead_time(Duration::from_millis(29_900))
		.build()?;

	pipeline.get(Some("primary")).await?;
	tokio::time::sleep(Duration::from_millis(200)).await;

	// Still answered from the current snapshot while the refresh runs in the background.
	assert_eq!(pipeline.get(Some("primary")).await?.key_type(), "RSA");

	let mut status = pipeline.status();

	for _ in 0..100 {
		if status.cache.as_ref().and_then(|cache| cache.generation) == Some(2) {
			break;
		}

		tokio::time::sleep(Duration::from_millis(50)).await;
		status = pipeline.status();
	}

	assert_eq!(status.cache.and_then(|cache| cache.generation), Some(2));
	assert_eq!(status.metrics.preemptive_refreshes, 1);
	assert_eq!(support::requests(&server).await, 2);
	assert_eq!(pipeline.get(Some("rotated")).await?.key_type(), "EC");
	Ok(())
}

#[tokio::test]
async fn rejects_guards_without_a_cache() {
	let url = url::Url::parse("https://issuer.example.com/.well-known/jwks.json").expect("url");
	let err = JwkProviderBuilder::new(url.clone()).cached(false).build().unwrap_err();

	assert_eq!(err.kind(), ErrorKind::Configuration);
	assert!(
		JwkProviderBuilder::new(url).cached(false).rate_limited(false).build().is_ok(),
		"direct lookups need no guard layers"
	);
}
