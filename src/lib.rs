//! Resilient async HTTP core for the Stride fitness app — bearer session injection,
//! single-flight token refresh, and bounded retry with offline fallback.
//!
//! Screens talk to domain services (for example [`GroupService`]), services talk to the
//! [`ApiClient`], and the client talks to the Stride REST API. The [`fetch`] module sits
//! between screens and services and degrades to a known-good fallback value when the
//! network keeps failing, so callers always end up with something renderable.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod fetch;
pub mod http;
pub mod metrics;
pub mod security;

mod error;
mod groups;
mod session;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	error::{Error, Result},
	fetch::{
		policy::{CancelToken, FetchOutcome, execute_with_retry, format_error_for_user},
		state::FetchState,
	},
	groups::{Group, GroupService, seed_groups},
	http::{
		client::{ApiClient, ApiClientBuilder, ClientConfig},
		retry::{JitterStrategy, RetryPolicy},
	},
	session::{Session, SessionManager, SessionProvider},
};
