//! HTTP key source and its client settings.

// std
use std::collections::BTreeMap;
// crates.io
use async_trait::async_trait;
use http::{
	HeaderMap, HeaderName, HeaderValue,
	header::{ACCEPT, CONTENT_LENGTH},
};
use reqwest::{Client, Proxy, redirect::Policy};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, jwk::KeySet, provider::JwksProvider, source};

/// Path appended to bare domains.
pub const WELL_KNOWN_JWKS_PATH: &str = "/.well-known/jwks.json";
/// Default maximum JWKS payload size accepted from the origin.
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client settings for [`UrlJwksProvider`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
	/// TCP connect timeout.
	#[serde(default = "default_connect_timeout")]
	pub connect_timeout: Duration,
	/// Per-request timeout covering the response body; unbounded when unset.
	#[serde(default)]
	pub read_timeout: Option<Duration>,
	/// Extra request headers; they replace defaults such as `Accept`.
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	/// Proxy every request through this URL.
	#[serde(default)]
	pub proxy: Option<Url>,
	/// Maximum size allowed for JWKS payloads in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
}
impl HttpSettings {
	/// Validate the settings against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.connect_timeout.is_zero() {
			return Err(Error::Validation {
				field: "http.connect_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.read_timeout.is_some_and(|timeout| timeout.is_zero()) {
			return Err(Error::Validation {
				field: "http.read_timeout",
				reason: "Must be greater than zero when set.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "http.max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		header_map(&self.headers)?;

		Ok(())
	}
}
impl Default for HttpSettings {
	fn default() -> Self {
		Self {
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			read_timeout: None,
			headers: BTreeMap::new(),
			proxy: None,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
		}
	}
}

/// Fetches the key set from a JWKS endpoint on every call.
#[derive(Clone, Debug)]
pub struct UrlJwksProvider {
	url: Url,
	client: Client,
	headers: HeaderMap,
	read_timeout: Option<Duration>,
	max_response_bytes: u64,
}
impl UrlJwksProvider {
	/// Fetch from `url` with default settings.
	pub fn new(url: Url) -> Result<Self> {
		Self::with_settings(url, &HttpSettings::default())
	}

	/// Fetch from `url`, building a dedicated client from `settings`.
	pub fn with_settings(url: Url, settings: &HttpSettings) -> Result<Self> {
		settings.validate()?;

		let mut builder = Client::builder()
			.redirect(Policy::limited(10))
			.user_agent(format!("jwks-provider/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(settings.connect_timeout);

		if let Some(proxy) = &settings.proxy {
			builder = builder.proxy(Proxy::all(proxy.as_str()).map_err(|err| {
				Error::Validation { field: "http.proxy", reason: format!("Invalid proxy: {err}.") }
			})?);
		}

		Ok(Self {
			url,
			client: builder.build()?,
			headers: header_map(&settings.headers)?,
			read_timeout: settings.read_timeout,
			max_response_bytes: settings.max_response_bytes,
		})
	}

	/// Fetch `{domain}/.well-known/jwks.json` with default settings.
	pub fn for_domain(domain: &str) -> Result<Self> {
		Self::new(url_for_domain(domain)?)
	}

	/// JWKS endpoint.
	pub fn url(&self) -> &Url {
		&self.url
	}

	fn guard_size(&self, size: u64) -> Result<()> {
		if size > self.max_response_bytes {
			return Err(Error::Unavailable(format!(
				"Response size {size} bytes exceeds the configured guard of {limit} bytes.",
				limit = self.max_response_bytes
			)));
		}

		Ok(())
	}
}
#[async_trait]
impl JwksProvider for UrlJwksProvider {
	#[tracing::instrument(skip(self), fields(url = %self.url))]
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		let mut request = self
			.client
			.get(self.url.clone())
			.header(ACCEPT, HeaderValue::from_static("application/json"))
			.headers(self.headers.clone());

		if let Some(timeout) = self.read_timeout {
			request = request.timeout(timeout);
		}

		let start = Instant::now();
		let mut response = request.send().await?;
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus { status, url: self.url.clone(), body });
		}

		let declared = response
			.headers()
			.get(CONTENT_LENGTH)
			.and_then(|value| value.to_str().ok())
			.and_then(|raw| raw.parse::<u64>().ok());

		if let Some(size) = declared {
			self.guard_size(size)?;
		}

		// Chunked bodies carry no length up front; enforce the guard while reading.
		let mut body = Vec::with_capacity(declared.unwrap_or_default() as usize);

		while let Some(chunk) = response.chunk().await? {
			self.guard_size((body.len() + chunk.len()) as u64)?;
			body.extend_from_slice(&chunk);
		}

		let jwks = source::decode_jwks(&body, self.url.as_str())?;

		tracing::debug!(
			status = %status,
			elapsed = ?start.elapsed(),
			keys = jwks.len(),
			"jwks fetch complete"
		);

		Ok(jwks)
	}
}

/// Build the well-known JWKS URL for `domain`; bare domains default to `https://`.
///
/// Any path, query, or fragment on `domain` is replaced by [`WELL_KNOWN_JWKS_PATH`].
pub fn url_for_domain(domain: &str) -> Result<Url> {
	let domain = domain.trim();

	if domain.is_empty() {
		return Err(Error::Validation { field: "domain", reason: "Must not be empty.".into() });
	}

	let base = if domain.contains("://") {
		Url::parse(domain)?
	} else {
		Url::parse(&format!("https://{domain}"))?
	};

	Ok(base.join(WELL_KNOWN_JWKS_PATH)?)
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
	let mut map = HeaderMap::with_capacity(headers.len());

	for (name, value) in headers {
		let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| Error::Validation {
			field: "http.headers",
			reason: format!("Invalid header name {name:?}: {err}."),
		})?;
		let value = HeaderValue::from_str(value).map_err(|err| Error::Validation {
			field: "http.headers",
			reason: format!("Invalid value for header {name}: {err}."),
		})?;

		map.insert(name, value);
	}

	Ok(map)
}

fn default_connect_timeout() -> Duration {
	DEFAULT_CONNECT_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}
