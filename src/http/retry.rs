//! Retry policy, backoff schedule, and attempt bookkeeping.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::time;
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Supported jitter strategies for retry backoff.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 80% and 100% of the computed backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Bounded-retry configuration for a fetch operation.
///
/// `max_attempts` counts total invocations of the operation, the initial one
/// included; the policy therefore always terminates after a finite, known
/// number of attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Total number of attempts allowed, including the first.
	pub max_attempts: u32,
	/// Delay before the first retry.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_attempts == 0 {
			return Err(Error::Validation {
				field: "retry_policy.max_attempts",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}

		Ok(())
	}

	/// Deterministic delay before retry number `attempt` (zero-based).
	///
	/// Exponential in the attempt number and capped at `max_backoff`, which
	/// makes the schedule monotonically non-decreasing.
	pub fn retry_delay(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32);
		let base = self.initial_backoff.mul_f64(2f64.powi(exponent as i32));

		base.min(self.max_backoff).max(self.initial_backoff)
	}

	/// Delay actually slept before retry number `attempt`, with jitter applied.
	pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
		let bounded = self.retry_delay(attempt);

		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);

				random_within(lower, bounded)
			},
			JitterStrategy::Decorrelated => {
				let ceiling = self.max_backoff.min(bounded.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(8),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Tracks attempts consumed against a [`RetryPolicy`] during one fetch cycle.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	attempts_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Create a new executor respecting the supplied retry policy.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, attempts_used: 0 }
	}

	/// Consume one attempt; returns false once the policy's budget is spent.
	pub fn begin_attempt(&mut self) -> bool {
		if self.attempts_used >= self.policy.max_attempts {
			return false;
		}

		self.attempts_used = self.attempts_used.saturating_add(1);

		true
	}

	/// Whether another attempt is permitted under the policy.
	pub fn can_attempt(&self) -> bool {
		self.attempts_used < self.policy.max_attempts
	}

	/// Number of attempts that have already been consumed.
	pub fn attempts_used(&self) -> u32 {
		self.attempts_used
	}

	/// Backoff delay to sleep before the next attempt, if one is permitted.
	pub fn next_backoff(&self) -> Option<Duration> {
		if !self.can_attempt() {
			tracing::debug!(attempts = self.attempts_used, "retry budget exhausted");

			return None;
		}

		// attempts_used is at least 1 here; retry N sleeps on schedule slot N - 1.
		let delay = self.policy.backoff_with_jitter(self.attempts_used.saturating_sub(1));

		tracing::debug!(attempt = self.attempts_used, ?delay, "retry backoff computed");

		Some(delay)
	}

	/// Sleep for the computed backoff window if retrying is permitted.
	pub async fn sleep_backoff(&self) {
		if let Some(delay) = self.next_backoff()
			&& !delay.is_zero()
		{
			time::sleep(delay).await;
		}
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}
