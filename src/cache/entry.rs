//! Immutable cache entries published into a cache slot.

// self
use crate::{_prelude::*, jwk::KeySet};

/// A key-set snapshot together with the instant it stops being fresh.
///
/// Entries are never mutated; a refresh publishes a new entry with a higher generation.
#[derive(Clone, Debug)]
pub struct CacheEntry {
	jwks: Arc<KeySet>,
	expires_at: Instant,
	refreshed_at: DateTime<Utc>,
	generation: u64,
}
impl CacheEntry {
	/// Build an entry fetched at `now` that stays fresh for `ttl`.
	pub fn new(jwks: Arc<KeySet>, now: Instant, ttl: Duration, generation: u64) -> Self {
		Self { jwks, expires_at: now + ttl, refreshed_at: Utc::now(), generation }
	}

	/// Cached key set.
	pub fn jwks(&self) -> &Arc<KeySet> {
		&self.jwks
	}

	/// Monotonic deadline after which the entry is stale.
	pub fn expires_at(&self) -> Instant {
		self.expires_at
	}

	/// Wall-clock time the entry was published.
	pub fn refreshed_at(&self) -> DateTime<Utc> {
		self.refreshed_at
	}

	/// Publication counter of the owning slot.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Whether the entry may still be served at `now`.
	pub fn is_valid(&self, now: Instant) -> bool {
		now <= self.expires_at
	}

	/// Whether the entry expires within `lead` of `now`.
	pub fn expires_within(&self, now: Instant, lead: Duration) -> bool {
		now + lead >= self.expires_at
	}
}
