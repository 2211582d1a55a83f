//! Key sources sitting at the bottom of the pipeline.

pub mod file;
pub mod remote;

// self
use crate::{_prelude::*, jwk::KeySet};

/// Decode a JWKS document fetched from `origin`.
///
/// Malformed documents fail with [`Error::Serde`]; a well-formed document without keys fails with
/// [`Error::NotFound`].
pub fn decode_jwks(bytes: &[u8], origin: &str) -> Result<Arc<KeySet>> {
	let jwks: KeySet = serde_json::from_slice(bytes)?;

	if jwks.is_empty() {
		return Err(Error::NotFound(format!("Key set published at {origin} contains no keys.")));
	}

	Ok(Arc::new(jwks))
}
