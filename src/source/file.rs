//! Key source reading a JWKS document from the local filesystem.

// std
use std::path::{Path, PathBuf};
// crates.io
use async_trait::async_trait;
// self
use crate::{_prelude::*, jwk::KeySet, provider::JwksProvider, source};

/// Reads the key set from a file on every call.
#[derive(Clone, Debug)]
pub struct FileJwksProvider {
	path: PathBuf,
}
impl FileJwksProvider {
	/// Read keys from `path`.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Location of the JWKS document.
	pub fn path(&self) -> &Path {
		&self.path
	}
}
#[async_trait]
impl JwksProvider for FileJwksProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		let bytes = tokio::fs::read(&self.path).await?;
		let jwks = source::decode_jwks(&bytes, &self.path.display().to_string())?;

		tracing::debug!(path = %self.path.display(), keys = jwks.len(), "jwks file read");

		Ok(jwks)
	}
}
