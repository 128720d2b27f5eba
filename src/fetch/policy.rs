//! Bounded retry with terminal fallback substitution.
//!
//! Screens hand [`execute_with_retry`] an async operation and a known-good
//! fallback value. The policy retries transient failures with capped
//! exponential backoff and, once the budget is spent (or the failure is one
//! that must not be retried), resolves to the fallback instead of an error.
//! Callers are never left without a renderable value.

// std
use std::{
	future::Future,
	sync::atomic::{AtomicBool, Ordering},
};
// crates.io
use serde::Serialize;
use tokio::sync::Notify;
// self
use crate::{
	_prelude::*,
	fetch::state::FetchState,
	http::retry::{RetryExecutor, RetryPolicy},
	metrics,
};

/// Resolved result of a fetch cycle.
///
/// `offline` is true whenever `data` is the fallback value rather than live
/// data; `error` then carries a short user-facing explanation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FetchOutcome<T> {
	/// Live data on success, the fallback value otherwise.
	pub data: T,
	/// Whether the fallback value was substituted for live data.
	pub offline: bool,
	/// User-facing message describing why the fetch degraded, if it did.
	pub error: Option<String>,
}
impl<T> FetchOutcome<T> {
	fn fresh(data: T) -> Self {
		Self { data, offline: false, error: None }
	}

	fn degraded(data: T, message: String) -> Self {
		Self { data, offline: true, error: Some(message) }
	}

	/// Whether the outcome carries fallback data instead of live data.
	pub fn is_degraded(&self) -> bool {
		self.offline
	}
}

/// Cooperative cancellation handle for an in-flight fetch cycle.
///
/// Cloning is cheap; all clones observe the same flag. Cancellation is
/// honoured before each attempt and during each backoff wait, so a screen
/// being torn down stops driving the network promptly.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
	inner: Arc<CancelInner>,
}
impl CancelToken {
	/// Create a token in the not-cancelled state.
	pub fn new() -> Self {
		Self::default()
	}

	/// Flag the token as cancelled and wake any waiters.
	pub fn cancel(&self) {
		self.inner.flagged.store(true, Ordering::SeqCst);
		self.inner.notify.notify_waiters();
	}

	/// Whether the token has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.inner.flagged.load(Ordering::SeqCst)
	}

	/// Resolve once the token is cancelled.
	pub async fn cancelled(&self) {
		loop {
			// Register interest before re-checking to avoid a lost wakeup.
			let notified = self.inner.notify.notified();

			if self.is_cancelled() {
				return;
			}

			notified.await;
		}
	}
}

#[derive(Debug, Default)]
struct CancelInner {
	flagged: AtomicBool,
	notify: Notify,
}

/// Run `operation` with bounded retries, resolving to `fallback` on defeat.
///
/// Retryable failures (transport, server errors) are reattempted up to
/// `policy.max_attempts` total invocations with jittered exponential backoff
/// between attempts. Non-retryable failures and cancellation short-circuit to
/// the fallback immediately. The returned [`FetchOutcome`] always carries a
/// usable value; this function never returns an error.
///
/// Each call is an independent cycle: a caller-driven "try again" simply
/// invokes the function again with a fresh attempt budget.
pub async fn execute_with_retry<T, F, Fut>(
	operation: F,
	fallback: T,
	policy: &RetryPolicy,
	cancel: &CancelToken,
) -> FetchOutcome<T>
where
	F: Fn() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut state = FetchState::default();
	let mut executor = RetryExecutor::new(policy);
	let mut last_error: Option<Error> = None;

	state.begin();

	while executor.begin_attempt() {
		if cancel.is_cancelled() {
			return cancelled_outcome(fallback, &mut state);
		}

		match operation().await {
			Ok(data) => {
				state.record_success();

				return FetchOutcome::fresh(data);
			},
			Err(err) if !err.is_retryable() => {
				tracing::warn!(error = %err, "fetch failed terminally; serving fallback");

				state.abort();
				metrics::record_offline_fallback("terminal");

				return FetchOutcome::degraded(fallback, err.user_message());
			},
			Err(err) => {
				tracing::debug!(
					attempt = executor.attempts_used(),
					error = %err,
					"fetch attempt failed"
				);

				state.record_failure(policy.max_attempts);
				last_error = Some(err);

				if executor.can_attempt() {
					tokio::select! {
						_ = executor.sleep_backoff() => {},
						_ = cancel.cancelled() => {
							return cancelled_outcome(fallback, &mut state);
						},
					}
				}
			},
		}
	}

	let message = last_error
		.map(|err| err.user_message())
		.unwrap_or_else(|| "Something went wrong. Please try again.".into());

	tracing::warn!(
		attempts = executor.attempts_used(),
		state = ?state,
		"fetch budget exhausted; serving fallback"
	);
	metrics::record_offline_fallback("exhausted");

	FetchOutcome::degraded(fallback, message)
}

/// Translate any crate error into a short, user-facing string.
///
/// Thin alias over [`Error::user_message`] for callers that hold an error
/// outside a fetch cycle (for example from a direct service call).
pub fn format_error_for_user(error: &Error) -> String {
	error.user_message()
}

fn cancelled_outcome<T>(fallback: T, state: &mut FetchState) -> FetchOutcome<T> {
	tracing::debug!("fetch cancelled by the caller");

	state.abort();
	metrics::record_offline_fallback("cancelled");

	FetchOutcome::degraded(fallback, Error::Cancelled.user_message())
}
