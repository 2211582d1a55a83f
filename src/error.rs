//! Crate-wide error types and `Result` alias.

// self
use crate::_prelude::*;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes a caller of the pipeline reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// The key id is absent after a forced refresh, or the endpoint published no keys.
	NotFound,
	/// The key set cannot be obtained right now (transport, parse, or refresh-lock timeout).
	Unavailable,
	/// The upstream call budget is exhausted; see [`Error::retry_after`].
	RateLimited,
	/// A key entry exists but cannot be turned into usable public key material.
	InvalidKeyMaterial,
	/// The pipeline or one of its parts was configured incorrectly.
	Configuration,
}

/// Unified error type for the JWKS provider crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("Invalid key material: {0}")]
	InvalidKeyMaterial(String),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Signing key not found: {0}")]
	NotFound(String),
	#[error("Rate limit reached; retry in {} ms.", retry_after.as_millis())]
	RateLimited { retry_after: Duration },
	#[error("Timed out after {} ms waiting for the cache refresh lock.", waited.as_millis())]
	RefreshTimeout { waited: Duration },
	#[error("Signing keys unavailable: {0}")]
	Unavailable(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Classify the error into the caller-facing taxonomy.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Io(_)
			| Self::Reqwest(_)
			| Self::Serde(_)
			| Self::HttpStatus { .. }
			| Self::RefreshTimeout { .. }
			| Self::Unavailable(_) => ErrorKind::Unavailable,
			Self::NotFound(_) => ErrorKind::NotFound,
			Self::RateLimited { .. } => ErrorKind::RateLimited,
			Self::InvalidKeyMaterial(_) => ErrorKind::InvalidKeyMaterial,
			Self::Url(_) | Self::Metrics(_) | Self::Validation { .. } => ErrorKind::Configuration,
		}
	}

	/// Whether the failure belongs to the `Unavailable` class.
	pub fn is_unavailable(&self) -> bool {
		self.kind() == ErrorKind::Unavailable
	}

	/// Whether a second attempt could plausibly succeed.
	///
	/// Malformed documents are `Unavailable` but not transient.
	pub fn is_transient(&self) -> bool {
		self.is_unavailable() && !matches!(self, Self::Serde(_))
	}

	/// Suggested wait before retrying a rate-limited call.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::RateLimited { retry_after } => Some(*retry_after),
			_ => None,
		}
	}
}
