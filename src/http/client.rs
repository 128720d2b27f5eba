//! Authenticated HTTP client for the Stride REST API.
//!
//! Every outbound request carries the current bearer token; a 401 triggers a
//! single-flight session refresh followed by exactly one resend of the
//! original request. The recovery path is straight-line code rather than a
//! loop, so a request can never be retried for authorization twice no matter
//! how often the upstream keeps answering 401.

// crates.io
use http::{
	HeaderMap, HeaderValue, Method, StatusCode,
	header::{ACCEPT, CONTENT_TYPE},
};
use reqwest::{Client, Response, redirect::Policy};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;
// self
use crate::{
	_prelude::*,
	metrics::{self, ClientMetrics},
	security,
	session::{DEFAULT_REFRESH_TIMEOUT, SessionManager, SessionProvider},
};

/// Default per-request timeout, backoff delays not included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for establishing new connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default response size guard (4 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 4_194_304;
/// Maximum redirect depth.
pub const MAX_REDIRECTS: u8 = 10;

/// Configuration for an [`ApiClient`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Base URL of the Stride REST API; request paths are joined onto it.
	pub base_url: Url,
	/// Whether HTTPS is required for the base URL.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Optional allowlist of domains requests may target.
	#[serde(default)]
	pub allowed_domains: Vec<String>,
	/// Timeout applied to each individual HTTP attempt.
	#[serde(default = "default_request_timeout")]
	pub request_timeout: Duration,
	/// Ceiling for a single session refresh round trip.
	#[serde(default = "default_refresh_timeout")]
	pub refresh_timeout: Duration,
	/// Maximum size allowed for response payloads in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
}
impl ClientConfig {
	/// Canonicalise the domain allowlist in-place.
	pub fn normalize_allowed_domains(&mut self) {
		let domains = std::mem::take(&mut self.allowed_domains);

		self.allowed_domains = security::normalize_allowlist(domains);
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.require_https {
			security::enforce_https(&self.base_url)?;
		}

		if let Some(host) = self.base_url.host_str() {
			if !security::host_is_allowed(host, &self.allowed_domains) {
				return Err(Error::Validation {
					field: "base_url",
					reason: "Host is not within the allowed_domains allowlist.".into(),
				});
			}
		} else {
			return Err(Error::Validation {
				field: "base_url",
				reason: "Must include a host component.".into(),
			});
		}

		if self.request_timeout < Duration::from_secs(1) {
			return Err(Error::Validation {
				field: "request_timeout",
				reason: "Must be at least 1 second.".into(),
			});
		}
		if self.refresh_timeout < Duration::from_secs(1) {
			return Err(Error::Validation {
				field: "refresh_timeout",
				reason: "Must be at least 1 second.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}

/// Builder for [`ApiClient`].
#[derive(Debug)]
pub struct ApiClientBuilder {
	base_url: Option<String>,
	require_https: bool,
	allowed_domains: Vec<String>,
	request_timeout: Duration,
	refresh_timeout: Duration,
	max_response_bytes: u64,
}
impl ApiClientBuilder {
	/// Create a builder with default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Set the API base URL; request paths are joined onto it.
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());

		self
	}

	/// Enforce HTTPS for the base URL (enabled by default).
	pub fn require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Add an entry to the domain allowlist.
	pub fn add_allowed_domain(mut self, domain: impl Into<String>) -> Self {
		let raw = domain.into();

		if let Some(domain) = security::canonicalize_dns_name(&raw)
			&& !self.allowed_domains.contains(&domain)
		{
			self.allowed_domains.push(domain);
		}

		self
	}

	/// Override the per-request timeout.
	pub fn request_timeout(mut self, value: Duration) -> Self {
		self.request_timeout = value;

		self
	}

	/// Override the session refresh timeout.
	pub fn refresh_timeout(mut self, value: Duration) -> Self {
		self.refresh_timeout = value;

		self
	}

	/// Override the response size guard.
	pub fn max_response_bytes(mut self, value: u64) -> Self {
		self.max_response_bytes = value;

		self
	}

	/// Finalise the configuration and construct an [`ApiClient`].
	///
	/// The session provider is injected here; production code passes the
	/// app's auth SDK adapter and tests pass fakes.
	pub fn build(self, provider: Arc<dyn SessionProvider>) -> Result<ApiClient> {
		let raw = self.base_url.ok_or_else(|| Error::Validation {
			field: "base_url",
			reason: "Must be provided.".into(),
		})?;
		let mut base_url = Url::parse(&raw)?;

		// A trailing slash makes Url::join append instead of replacing the
		// last path segment.
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		let mut config = ClientConfig {
			base_url,
			require_https: self.require_https,
			allowed_domains: self.allowed_domains,
			request_timeout: self.request_timeout,
			refresh_timeout: self.refresh_timeout,
			max_response_bytes: self.max_response_bytes,
		};

		config.normalize_allowed_domains();
		config.validate()?;

		let http = Client::builder()
			.default_headers(default_headers())
			.redirect(Policy::limited(MAX_REDIRECTS as usize))
			.user_agent(format!("stride-client/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(CONNECT_TIMEOUT)
			.build()?;
		let sessions = SessionManager::with_refresh_timeout(provider, config.refresh_timeout);

		Ok(ApiClient {
			inner: Arc::new(ClientInner { http, config, sessions, metrics: ClientMetrics::new() }),
		})
	}
}
impl Default for ApiClientBuilder {
	fn default() -> Self {
		Self {
			base_url: None,
			require_https: true,
			allowed_domains: Vec::new(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
		}
	}
}

/// Authenticated JSON client for the Stride REST API.
///
/// Cheap to clone; all clones share one connection pool, session manager, and
/// metrics accumulator.
#[derive(Clone, Debug)]
pub struct ApiClient {
	inner: Arc<ClientInner>,
}
impl ApiClient {
	/// Create an [`ApiClientBuilder`] for configuration.
	pub fn builder() -> ApiClientBuilder {
		ApiClientBuilder::new()
	}

	/// Access the active configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Access the per-client metrics accumulator.
	pub fn metrics(&self) -> Arc<ClientMetrics> {
		self.inner.metrics.clone()
	}

	/// Issue a GET request and decode the JSON response body.
	pub async fn get_json<T>(&self, path: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = self.execute(Method::GET, path, None).await?;

		self.decode_json(response).await
	}

	/// Issue a POST request with a JSON body and decode the JSON response.
	pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		let body = serde_json::to_value(body)?;
		let response = self.execute(Method::POST, path, Some(&body)).await?;

		self.decode_json(response).await
	}

	/// Issue a PUT request with a JSON body and decode the JSON response.
	pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		let body = serde_json::to_value(body)?;
		let response = self.execute(Method::PUT, path, Some(&body)).await?;

		self.decode_json(response).await
	}

	/// Issue a DELETE request, discarding any response body.
	pub async fn delete(&self, path: &str) -> Result<()> {
		self.execute(Method::DELETE, path, None).await?;

		Ok(())
	}

	/// Execute one logical request, recovering from at most one 401.
	#[tracing::instrument(skip(self, body), fields(method = %method, path))]
	async fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
		let url = self.endpoint(path)?;
		let started = Instant::now();
		let result = self.execute_inner(&method, &url, body).await;
		let elapsed = started.elapsed();
		let success = result.is_ok();

		self.inner.metrics.record_request(success, elapsed);
		metrics::record_request(method.as_str(), if success { "success" } else { "error" }, elapsed);

		match &result {
			Ok(response) =>
				tracing::debug!(status = %response.status(), ?elapsed, "request complete"),
			Err(err) => tracing::debug!(error = %err, ?elapsed, "request failed"),
		}

		result
	}

	async fn execute_inner(
		&self,
		method: &Method,
		url: &Url,
		body: Option<&Value>,
	) -> Result<Response> {
		let token = self.inner.sessions.bearer_token().await;
		let response = self.send_once(method, url, body, token.as_deref()).await?;

		if response.status() != StatusCode::UNAUTHORIZED {
			return check_status(response, url).await;
		}

		tracing::debug!("request rejected as unauthorized; refreshing session");

		// One-shot recovery: this path is straight-line code, so the resend
		// below can never recurse into another refresh.
		let refreshed = match self.inner.sessions.refresh_after_rejection(token.as_deref()).await {
			Ok(session) => {
				self.inner.metrics.record_auth_refresh(true);
				metrics::record_auth_refresh("success");

				session
			},
			Err(err) => {
				self.inner.metrics.record_auth_refresh(false);
				metrics::record_auth_refresh("error");

				return Err(err);
			},
		};
		let retried =
			self.send_once(method, url, body, Some(refreshed.access_token.as_str())).await?;

		if retried.status() == StatusCode::UNAUTHORIZED {
			tracing::warn!("refreshed credential was rejected; giving up");

			return Err(Error::Unauthorized { url: url.clone() });
		}

		check_status(retried, url).await
	}

	async fn send_once(
		&self,
		method: &Method,
		url: &Url,
		body: Option<&Value>,
		bearer: Option<&str>,
	) -> Result<Response> {
		let mut request = self
			.inner
			.http
			.request(method.clone(), url.clone())
			.timeout(self.inner.config.request_timeout);

		if let Some(body) = body {
			request = request.json(body);
		}
		if let Some(token) = bearer {
			request = request.bearer_auth(token);
		}

		Ok(request.send().await?)
	}

	async fn decode_json<T>(&self, response: Response) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let bytes = response.bytes().await?;

		if bytes.len() as u64 > self.inner.config.max_response_bytes {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: format!(
					"Response size {size} bytes exceeds the configured guard of {limit} bytes.",
					size = bytes.len(),
					limit = self.inner.config.max_response_bytes
				),
			});
		}

		Ok(serde_json::from_slice(&bytes)?)
	}

	fn endpoint(&self, path: &str) -> Result<Url> {
		// Stripping leading slashes keeps joins relative to the configured
		// base path and rules out scheme-relative escapes.
		let url = self.inner.config.base_url.join(path.trim_start_matches('/'))?;

		if !security::host_is_allowed(
			url.host_str().unwrap_or_default(),
			&self.inner.config.allowed_domains,
		) {
			return Err(Error::Security(format!(
				"Request target '{url}' is outside the allowed domains."
			)));
		}

		Ok(url)
	}
}

#[derive(Debug)]
struct ClientInner {
	http: Client,
	config: ClientConfig,
	sessions: SessionManager,
	metrics: Arc<ClientMetrics>,
}

async fn check_status(response: Response, url: &Url) -> Result<Response> {
	let status = response.status();

	if status.is_success() {
		return Ok(response);
	}

	let body = response.text().await.ok();

	Err(Error::HttpStatus { status, url: url.clone(), body })
}

fn default_headers() -> HeaderMap {
	let mut headers = HeaderMap::with_capacity(2);

	headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
	headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

	headers
}

fn default_true() -> bool {
	true
}

fn default_request_timeout() -> Duration {
	DEFAULT_REQUEST_TIMEOUT
}

fn default_refresh_timeout() -> Duration {
	DEFAULT_REFRESH_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}
