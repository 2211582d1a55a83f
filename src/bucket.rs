//! Token bucket bounding the rate of upstream JWKS fetches.
//!
//! Tokens accrue at `rate` per `period`; partial progress towards the next token is carried
//! across refills so that frequent polling never loses time.

// crates.io
use parking_lot::Mutex;
// self
use crate::_prelude::*;

/// Thread-safe token bucket.
#[derive(Debug)]
pub struct TokenBucket {
	capacity: u32,
	rate: u32,
	period: Duration,
	time_per_token: Duration,
	state: Mutex<BucketState>,
}
impl TokenBucket {
	/// Create a full bucket holding `capacity` tokens, refilled at `rate` tokens per `period`.
	pub fn new(capacity: u32, rate: u32, period: Duration) -> Result<Self> {
		if capacity == 0 {
			return Err(Error::Validation {
				field: "rate_limit.capacity",
				reason: "Must be greater than zero.".into(),
			});
		}
		if rate == 0 {
			return Err(Error::Validation {
				field: "rate_limit.rate",
				reason: "Must be greater than zero.".into(),
			});
		}

		let time_per_token = period / rate;

		if time_per_token.is_zero() {
			return Err(Error::Validation {
				field: "rate_limit.period",
				reason: "Must leave a non-zero interval per token.".into(),
			});
		}

		Ok(Self {
			capacity,
			rate,
			period,
			time_per_token,
			state: Mutex::new(BucketState {
				available: capacity,
				accum_delta: Duration::ZERO,
				baseline: Instant::now(),
			}),
		})
	}

	/// Maximum number of tokens the bucket holds.
	pub fn capacity(&self) -> u32 {
		self.capacity
	}

	/// Tokens added per [`TokenBucket::period`].
	pub fn rate(&self) -> u32 {
		self.rate
	}

	/// Refill period.
	pub fn period(&self) -> Duration {
		self.period
	}

	/// Interval after which one token accrues.
	pub fn time_per_token(&self) -> Duration {
		self.time_per_token
	}

	/// Tokens currently available.
	pub fn available(&self) -> u32 {
		let mut state = self.state.lock();

		self.refill(&mut state, Instant::now());

		state.available
	}

	/// Try to take `count` tokens; returns `false` without side effects when too few are available.
	pub fn consume(&self, count: u32) -> Result<bool> {
		self.check_count(count)?;

		let mut state = self.state.lock();

		self.refill(&mut state, Instant::now());

		if count <= state.available {
			state.available -= count;

			Ok(true)
		} else {
			Ok(false)
		}
	}

	/// Time until `count` tokens will be available; zero when they already are.
	pub fn will_leak_in(&self, count: u32) -> Result<Duration> {
		self.check_count(count)?;

		let mut state = self.state.lock();
		let now = Instant::now();

		self.refill(&mut state, now);

		if state.available >= count {
			return Ok(Duration::ZERO);
		}

		let since_baseline = now.saturating_duration_since(state.baseline) + state.accum_delta;
		let mut wait = self.time_per_token.saturating_sub(since_baseline);
		let remaining = count - state.available - 1;

		if remaining > 0 {
			wait += self.time_per_token * remaining;
		}

		Ok(wait)
	}

	fn check_count(&self, count: u32) -> Result<()> {
		if count == 0 || count > self.capacity {
			return Err(Error::Validation {
				field: "count",
				reason: format!(
					"Cannot consume {count} tokens when the bucket capacity is {}.",
					self.capacity
				),
			});
		}

		Ok(())
	}

	fn refill(&self, state: &mut BucketState, now: Instant) {
		let elapsed = now.saturating_duration_since(state.baseline) + state.accum_delta;

		if elapsed < self.time_per_token {
			return;
		}

		let per_token = self.time_per_token.as_nanos();
		let tokens = elapsed.as_nanos() / per_token;
		let carry = elapsed.as_nanos() % per_token;
		let room = self.capacity - state.available;

		state.available += tokens.min(room as u128) as u32;
		state.accum_delta = Duration::from_nanos(carry as u64);
		state.baseline = now;
	}
}

#[derive(Debug)]
struct BucketState {
	available: u32,
	// Progress towards the next token carried over from the previous refill.
	accum_delta: Duration,
	baseline: Instant,
}
