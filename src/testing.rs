//! Scripted providers and key fixtures shared by unit tests.

// std
use std::{
	collections::VecDeque,
	sync::atomic::{AtomicUsize, Ordering},
};
// crates.io
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
// self
use crate::{
	_prelude::*,
	jwk::{Jwk, KeySet},
	provider::JwksProvider,
};

/// One scripted outcome of [`ScriptedProvider::jwks`].
#[derive(Clone, Debug)]
pub(crate) enum Step {
	Keys(Vec<&'static str>),
	Unavailable,
	Malformed,
	Empty,
}

/// Provider replaying a fixed script; the last step repeats once the script runs out.
#[derive(Debug)]
pub(crate) struct ScriptedProvider {
	steps: Mutex<VecDeque<Step>>,
	last: Mutex<Step>,
	calls: AtomicUsize,
	delay: Option<Duration>,
}
impl ScriptedProvider {
	pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
		Self::build(steps, None)
	}

	pub(crate) fn delayed(steps: impl IntoIterator<Item = Step>, delay: Duration) -> Arc<Self> {
		Self::build(steps, Some(delay))
	}

	pub(crate) fn keys(kids: &[&'static str]) -> Arc<Self> {
		Self::new([Step::Keys(kids.to_vec())])
	}

	pub(crate) fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn build(steps: impl IntoIterator<Item = Step>, delay: Option<Duration>) -> Arc<Self> {
		let steps: VecDeque<_> = steps.into_iter().collect();
		let last = steps.back().cloned().unwrap_or(Step::Empty);

		Arc::new(Self {
			steps: Mutex::new(steps),
			last: Mutex::new(last),
			calls: AtomicUsize::new(0),
			delay,
		})
	}

	fn next_step(&self) -> Step {
		match self.steps.lock().pop_front() {
			Some(step) => {
				*self.last.lock() = step.clone();

				step
			},
			None => self.last.lock().clone(),
		}
	}
}
#[async_trait]
impl JwksProvider for ScriptedProvider {
	async fn jwks(&self) -> Result<Arc<KeySet>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let step = self.next_step();

		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}

		match step {
			Step::Keys(kids) => Ok(key_set(&kids)),
			Step::Unavailable => Err(Error::Unavailable("scripted outage".into())),
			Step::Malformed => Err(serde_json::from_str::<KeySet>("{\"keys\":").unwrap_err().into()),
			Step::Empty => Err(Error::NotFound("scripted empty key set".into())),
		}
	}
}

pub(crate) fn key(kid: &str) -> Jwk {
	Jwk::from_value(json!({
		"kty": "RSA",
		"kid": kid,
		"alg": "RS256",
		"use": "sig",
		"n": "AQAB",
		"e": "AQAB",
	}))
	.expect("fixture key")
}

pub(crate) fn key_set(kids: &[&str]) -> Arc<KeySet> {
	Arc::new(KeySet::new(kids.iter().map(|kid| key(kid)).collect()))
}

pub(crate) fn kids(set: &KeySet) -> Vec<&str> {
	set.keys().iter().filter_map(Jwk::id).collect()
}
