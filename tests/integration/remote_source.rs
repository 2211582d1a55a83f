//! HTTP key source behaviour against a mock JWKS endpoint.

// std
use std::{collections::BTreeMap, iter, time::Duration};
// crates.io
use jwks_provider::{Error, ErrorKind, HttpSettings, JwksProvider, Result, UrlJwksProvider};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{header, method, path},
};
// self
use crate::support::{self, JWKS_BODY, JWKS_PATH};

#[tokio::test]
async fn fetches_and_decodes_the_key_set() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.and(header("accept", "application/json"))
		.respond_with(support::json(JWKS_BODY))
		.expect(1)
		.mount(&server)
		.await;

	let provider = UrlJwksProvider::new(support::jwks_url(&server))?;
	let jwks = provider.jwks().await?;

	assert_eq!(jwks.len(), 1);
	assert_eq!(jwks.find(Some("primary")).map(|key| key.key_type()), Some("RSA"));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn sends_configured_headers() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(header("x-tenant", "acme"))
		.and(header("accept", "application/jwk-set+json"))
		.respond_with(support::json(JWKS_BODY))
		.expect(1)
		.mount(&server)
		.await;

	let settings = HttpSettings {
		headers: BTreeMap::from([
			("x-tenant".to_string(), "acme".to_string()),
			("accept".to_string(), "application/jwk-set+json".to_string()),
		]),
		..Default::default()
	};
	let provider = UrlJwksProvider::with_settings(support::jwks_url(&server), &settings)?;

	provider.jwks().await?;

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn classifies_upstream_failures() -> Result<()> {
	let server = MockServer::start().await;

	support::respond_times(&server, ResponseTemplate::new(503).set_body_string("down"), 1).await;
	support::respond_times(&server, support::json("{\"keys\": [ {"), 1).await;
	support::respond_times(&server, support::json("{\"keys\": []}"), 1).await;

	let provider = UrlJwksProvider::new(support::jwks_url(&server))?;
	let upstream = provider.jwks().await.unwrap_err();

	assert!(matches!(
		&upstream,
		Error::HttpStatus { status, body: Some(body), .. } if status.as_u16() == 503 && body == "down"
	));
	assert!(upstream.is_transient());

	let malformed = provider.jwks().await.unwrap_err();

	assert!(matches!(malformed, Error::Serde(_)));
	assert_eq!(malformed.kind(), ErrorKind::Unavailable);
	assert!(!malformed.is_transient());

	let empty = provider.jwks().await.unwrap_err();

	assert_eq!(empty.kind(), ErrorKind::NotFound);
	Ok(())
}

#[tokio::test]
async fn rejects_oversized_documents() -> Result<()> {
	let server = MockServer::start().await;

	support::respond_times(&server, support::json(JWKS_BODY), 1).await;

	let settings = HttpSettings { max_response_bytes: 64, ..Default::default() };
	let provider = UrlJwksProvider::with_settings(support::jwks_url(&server), &settings)?;
	let err = provider.jwks().await.unwrap_err();

	assert!(matches!(err, Error::Unavailable(_)));
	Ok(())
}

#[tokio::test]
async fn decodes_chunked_documents() -> Result<()> {
	let chunks: Vec<_> = JWKS_BODY.as_bytes().chunks(16).map(<[u8]>::to_vec).collect();
	let url = support::serve_chunks(chunks).await;
	let jwks = UrlJwksProvider::new(url)?.jwks().await?;

	assert_eq!(jwks.find(Some("primary")).map(|key| key.key_type()), Some("RSA"));
	Ok(())
}

#[tokio::test]
async fn stops_reading_chunked_documents_past_the_size_guard() -> Result<()> {
	let url = support::serve_chunks(iter::repeat(vec![b' '; 1024])).await;
	let settings = HttpSettings { max_response_bytes: 4096, ..Default::default() };
	let provider = UrlJwksProvider::with_settings(url, &settings)?;
	let err = tokio::time::timeout(Duration::from_secs(10), provider.jwks())
		.await
		.expect("guard aborts an endless body")
		.unwrap_err();

	assert!(matches!(err, Error::Unavailable(_)));
	Ok(())
}

#[tokio::test]
async fn unreachable_endpoints_are_unavailable() -> Result<()> {
	let url = url::Url::parse("http://127.0.0.1:9/.well-known/jwks.json")?;
	let err = UrlJwksProvider::new(url)?.jwks().await.unwrap_err();

	assert_eq!(err.kind(), ErrorKind::Unavailable);
	Ok(())
}
