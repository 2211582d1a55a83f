//! Capability traits shared by every layer of the pipeline, plus the uncached key lookup.

pub mod outage;
pub mod rate_limited;
pub mod retrying;

// std
use std::fmt::Debug;
// crates.io
use async_trait::async_trait;
// self
use crate::{
	_prelude::*,
	jwk::{Jwk, KeySet},
};

/// Something that can produce the current key set.
///
/// Sources and decorators all implement this trait; each decorator holds the next layer as an
/// `Arc<dyn JwksProvider>`.
#[async_trait]
pub trait JwksProvider: Send + Sync + Debug {
	/// Return the current key set snapshot.
	async fn jwks(&self) -> Result<Arc<KeySet>>;
}

/// Something that can resolve a single key by id.
#[async_trait]
pub trait JwkProvider: Send + Sync + Debug {
	/// Resolve the key for `kid`; a `None` id resolves only against a single-key set.
	async fn jwk(&self, kid: Option<&str>) -> Result<Jwk>;
}

/// Key lookup that fetches the full set from the wrapped provider on every call.
#[derive(Clone, Debug)]
pub struct DefaultJwkProvider {
	inner: Arc<dyn JwksProvider>,
}
impl DefaultJwkProvider {
	/// Wrap a key-set provider.
	pub fn new(inner: Arc<dyn JwksProvider>) -> Self {
		Self { inner }
	}

	/// Provider consulted on every lookup.
	pub fn inner(&self) -> &Arc<dyn JwksProvider> {
		&self.inner
	}
}
#[async_trait]
impl JwksProvider for DefaultJwkProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		self.inner.jwks().await
	}
}
#[async_trait]
impl JwkProvider for DefaultJwkProvider {
	async fn jwk(&self, kid: Option<&str>) -> Result<Jwk> {
		let jwks = self.inner.jwks().await?;

		lookup(&jwks, kid)
	}
}

/// Find `kid` in `jwks`, reporting a miss as [`Error::NotFound`].
pub(crate) fn lookup(jwks: &KeySet, kid: Option<&str>) -> Result<Jwk> {
	jwks.find(kid).cloned().ok_or_else(|| not_found(jwks, kid))
}

pub(crate) fn not_found(jwks: &KeySet, kid: Option<&str>) -> Error {
	match kid {
		Some(kid) => Error::NotFound(format!("No key found for key id {kid:?}.")),
		None => Error::NotFound(format!(
			"No key id given and the key set holds {} keys instead of exactly one.",
			jwks.len()
		)),
	}
}
