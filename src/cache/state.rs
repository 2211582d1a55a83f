//! Cache lifecycle states and the status snapshot exposed to operators.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, cache::entry::CacheEntry};

/// Cache lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
	/// Nothing has been published yet.
	Empty,
	/// A fresh entry is being served.
	Ready,
	/// The published entry is past its expiry and the next lookup will refresh it.
	Expired,
	/// A refresh currently holds the refresh lock.
	Refreshing,
}

/// Point-in-time view of a cache slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
	/// Lifecycle state at capture time.
	pub state: CacheState,
	/// Generation of the published entry.
	pub generation: Option<u64>,
	/// Keys in the published entry.
	pub key_count: usize,
	/// When the published entry was fetched.
	pub last_refresh: Option<DateTime<Utc>>,
	/// When the published entry stops being fresh.
	pub expires_at: Option<DateTime<Utc>>,
	/// Whether a background refresh is queued or running for the published generation.
	pub refresh_scheduled: bool,
}
impl CacheStatus {
	pub(crate) fn capture(
		entry: Option<&CacheEntry>,
		refreshing: bool,
		refresh_scheduled: bool,
	) -> Self {
		let captured_at = Instant::now();
		let captured_at_wallclock = Utc::now();
		let state = match entry {
			_ if refreshing => CacheState::Refreshing,
			None => CacheState::Empty,
			Some(entry) if entry.is_valid(captured_at) => CacheState::Ready,
			Some(_) => CacheState::Expired,
		};

		Self {
			state,
			generation: entry.map(CacheEntry::generation),
			key_count: entry.map(|entry| entry.jwks().len()).unwrap_or_default(),
			last_refresh: entry.map(CacheEntry::refreshed_at),
			expires_at: entry.and_then(|entry| {
				to_datetime(captured_at, captured_at_wallclock, entry.expires_at())
			}),
			refresh_scheduled,
		}
	}
}

/// Convert a monotonic instant into wall-clock time relative to a captured reference point.
fn to_datetime(
	captured_at: Instant,
	captured_at_wallclock: DateTime<Utc>,
	instant: Instant,
) -> Option<DateTime<Utc>> {
	if let Some(delta) = instant.checked_duration_since(captured_at) {
		let chrono = TimeDelta::from_std(delta).ok()?;

		captured_at_wallclock.checked_add_signed(chrono)
	} else if let Some(delta) = captured_at.checked_duration_since(instant) {
		let chrono = TimeDelta::from_std(delta).ok()?;

		captured_at_wallclock.checked_sub_signed(chrono)
	} else {
		None
	}
}
