//! Session model and the auth-provider boundary.
//!
//! The auth provider (sign-in, token storage, refresh) lives outside this crate. The
//! client only depends on the [`SessionProvider`] capability, injected at construction
//! time so tests can substitute fakes without global state.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time};
// self
use crate::_prelude::*;

/// Default ceiling for a single session refresh round trip.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// The signed-in user's current access credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	/// Bearer token sent in the `Authorization` header.
	pub access_token: String,
	/// UTC expiry of the access token, when the provider advertises one.
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
}
impl Session {
	/// Construct a session from a token and optional expiry.
	pub fn new(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
		Self { access_token: access_token.into(), expires_at }
	}

	/// Whether the access token's validity window has passed.
	///
	/// Sessions without an advertised expiry are treated as live; the server
	/// remains the authority either way.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.map(|expires_at| now >= expires_at).unwrap_or(false)
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Session")
			.field("access_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// External auth/session capability the client depends on.
///
/// Implementations wrap whatever identity SDK the app ships with. All three
/// operations are opaque to this crate; `refresh_session` is expected to be
/// safe to call concurrently, though [`SessionManager`] serialises calls so a
/// well-behaved provider only ever sees one refresh in flight.
#[async_trait]
pub trait SessionProvider: Send + Sync {
	/// Current session, or `None` when nobody is signed in.
	async fn current_session(&self) -> Option<Session>;

	/// Exchange the stored refresh credential for a new session.
	async fn refresh_session(&self) -> Result<Session>;

	/// Destroy the session and any stored credentials.
	async fn sign_out(&self);
}

/// Serialises session refreshes and owns the sign-out-on-rejection policy.
///
/// Concurrent requests that each observe a 401 all funnel through
/// [`SessionManager::refresh_after_rejection`]; the first caller performs the
/// refresh and later callers reuse its result instead of stacking redundant
/// refresh calls on the provider.
pub struct SessionManager {
	provider: Arc<dyn SessionProvider>,
	refresh_gate: Mutex<()>,
	refresh_timeout: Duration,
}
impl SessionManager {
	/// Wrap an injected provider with the default refresh timeout.
	pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
		Self::with_refresh_timeout(provider, DEFAULT_REFRESH_TIMEOUT)
	}

	/// Wrap an injected provider with an explicit refresh timeout.
	pub fn with_refresh_timeout(
		provider: Arc<dyn SessionProvider>,
		refresh_timeout: Duration,
	) -> Self {
		Self { provider, refresh_gate: Mutex::new(()), refresh_timeout }
	}

	/// Bearer token to attach to an outbound request, if a session exists.
	///
	/// Expired tokens are still attached; the 401 recovery path handles
	/// rejection, and the server stays authoritative on validity.
	pub async fn bearer_token(&self) -> Option<String> {
		let session = self.provider.current_session().await?;

		if session.access_token.is_empty() { None } else { Some(session.access_token) }
	}

	/// Obtain a usable session after `rejected_token` was refused upstream.
	///
	/// Single-flight: the gate admits one caller at a time. Callers that were
	/// queued behind an in-flight refresh re-read the current session first
	/// and reuse it when it already differs from the token they saw rejected.
	///
	/// An explicit provider rejection signs the user out and surfaces
	/// [`Error::SessionExpired`]; a refresh that exceeds the timeout leaves
	/// the session untouched and surfaces [`Error::RefreshTimeout`].
	#[tracing::instrument(skip(self, rejected_token))]
	pub async fn refresh_after_rejection(&self, rejected_token: Option<&str>) -> Result<Session> {
		let _gate = self.refresh_gate.lock().await;

		if let Some(current) = self.provider.current_session().await
			&& rejected_token != Some(current.access_token.as_str())
			&& !current.is_expired(Utc::now())
		{
			tracing::debug!("reusing session refreshed by a concurrent request");

			return Ok(current);
		}

		match time::timeout(self.refresh_timeout, self.provider.refresh_session()).await {
			Ok(Ok(session)) => {
				tracing::debug!("session refresh succeeded");

				Ok(session)
			},
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "session refresh rejected; signing out");

				self.provider.sign_out().await;

				Err(Error::SessionExpired { reason: err.to_string() })
			},
			Err(_) => {
				tracing::warn!(timeout = ?self.refresh_timeout, "session refresh timed out");

				Err(Error::RefreshTimeout { timeout: self.refresh_timeout })
			},
		}
	}

	/// Destroy the current session via the provider.
	pub async fn sign_out(&self) {
		self.provider.sign_out().await;
	}
}
impl Debug for SessionManager {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SessionManager")
			.field("refresh_timeout", &self.refresh_timeout)
			.finish_non_exhaustive()
	}
}
