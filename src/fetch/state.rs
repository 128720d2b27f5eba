//! Fetch lifecycle state machine.
//!
//! One logical fetch moves `Idle → Attempting(k) → {Success | Fallback}`. The
//! terminal states are absorbing; a caller-triggered "try again" starts a new
//! machine rather than reviving a finished one.

/// Lifecycle of a single fetch cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FetchState {
	/// No attempt has been made yet.
	#[default]
	Idle,
	/// Attempt number `k` (one-based) is in flight.
	Attempting(u32),
	/// The operation produced live data.
	Success,
	/// Attempts were exhausted or the failure was terminal; the fallback value was served.
	Fallback,
}
impl FetchState {
	/// Begin the first attempt; returns false unless the machine is idle.
	pub fn begin(&mut self) -> bool {
		match self {
			Self::Idle => {
				*self = Self::Attempting(1);

				true
			},
			_ => false,
		}
	}

	/// Record a successful attempt, reaching the `Success` terminal state.
	pub fn record_success(&mut self) -> bool {
		match self {
			Self::Attempting(_) => {
				*self = Self::Success;

				true
			},
			_ => false,
		}
	}

	/// Record a failed attempt.
	///
	/// Moves on to the next attempt while the budget allows, otherwise reaches
	/// the `Fallback` terminal state. `max_attempts` is the total invocation
	/// budget; `Fallback` is reached only after exactly that many attempts
	/// have failed (or immediately, via [`FetchState::abort`], for failures
	/// that must not be retried).
	pub fn record_failure(&mut self, max_attempts: u32) -> bool {
		match self {
			Self::Attempting(attempt) if *attempt < max_attempts => {
				let next = *attempt + 1;

				*self = Self::Attempting(next);

				true
			},
			Self::Attempting(_) => {
				*self = Self::Fallback;

				true
			},
			_ => false,
		}
	}

	/// Jump straight to `Fallback` from any non-terminal state.
	///
	/// Used for non-retryable failures and cancellation.
	pub fn abort(&mut self) -> bool {
		match self {
			Self::Idle | Self::Attempting(_) => {
				*self = Self::Fallback;

				true
			},
			_ => false,
		}
	}

	/// Current one-based attempt number, when an attempt is in flight.
	pub fn attempt(&self) -> Option<u32> {
		match self {
			Self::Attempting(attempt) => Some(*attempt),
			_ => None,
		}
	}

	/// Whether the machine has reached a terminal state.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Success | Self::Fallback)
	}
}
