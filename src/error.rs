//! Crate-wide error types and `Result` alias.

// crates.io
use http::StatusCode;
use url::Url;
// self
use crate::_prelude::Duration;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the Stride client crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: StatusCode, url: Url, body: Option<String> },
	#[error("Request to {url} was rejected as unauthorized after the session was refreshed.")]
	Unauthorized { url: Url },
	#[error("Session refresh was rejected by the auth provider: {reason}")]
	SessionExpired { reason: String },
	#[error("Session refresh did not complete within {timeout:?}.")]
	RefreshTimeout { timeout: Duration },

	#[error("Operation cancelled by the caller.")]
	Cancelled,
	#[cfg(feature = "prometheus")]
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// HTTP status associated with the error, when one exists.
	pub fn status(&self) -> Option<StatusCode> {
		match self {
			Self::Reqwest(err) => err.status(),
			Self::HttpStatus { status, .. } => Some(*status),
			Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
			_ => None,
		}
	}

	/// Whether the failure happened below HTTP semantics (connection, DNS, timeout).
	///
	/// A refresh timeout counts as transport: nothing was learned about the
	/// credential itself.
	pub fn is_transport(&self) -> bool {
		match self {
			Self::Reqwest(err) => err.status().is_none(),
			Self::RefreshTimeout { .. } => true,
			_ => false,
		}
	}

	/// Whether the failure is an authentication outcome.
	pub fn is_auth(&self) -> bool {
		match self {
			Self::Unauthorized { .. } | Self::SessionExpired { .. } => true,
			Self::HttpStatus { status, .. } => *status == StatusCode::UNAUTHORIZED,
			_ => false,
		}
	}

	/// Whether the caller-side retry policy may attempt the operation again.
	///
	/// Transport failures and server errors are worth retrying; client errors
	/// (including terminal auth outcomes) are not.
	pub fn is_retryable(&self) -> bool {
		if self.is_transport() {
			return true;
		}

		self.status().map(|status| status.is_server_error()).unwrap_or(false)
	}

	/// Translate the error into a short, user-facing message.
	///
	/// Raw transport and HTTP detail never reaches the screen; the message only
	/// distinguishes the handful of situations a user can act on.
	pub fn user_message(&self) -> String {
		if self.is_auth() {
			return "Your session has expired. Please sign in again.".into();
		}

		match self {
			Self::Reqwest(err) if err.is_timeout() =>
				"The request timed out. Check your connection and try again.".into(),
			Self::Reqwest(err) if err.status().is_none() =>
				"Unable to reach Stride. Check your internet connection.".into(),
			Self::RefreshTimeout { .. } =>
				"Signing you in took too long. Check your connection and try again.".into(),
			Self::Cancelled => "Request cancelled.".into(),
			_ => match self.status() {
				Some(status) if status.is_server_error() =>
					"Stride is having trouble right now. Please try again in a moment.".into(),
				Some(StatusCode::FORBIDDEN) => "You don't have permission to do that.".into(),
				Some(StatusCode::NOT_FOUND) =>
					"We couldn't find what you were looking for.".into(),
				_ => "Something went wrong. Please try again.".into(),
			},
		}
	}
}
