//! Integration tests for bearer injection and 401 refresh-and-retry behaviour.

// std
use std::sync::{
	Arc, Mutex,
	atomic::{AtomicU32, Ordering},
};
// crates.io
use async_trait::async_trait;
use stride_client::{ApiClient, Error, Result, Session, SessionProvider};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

const GROUPS_BODY: &str = r#"[
    {
        "id": "g-1",
        "name": "Morning Run Club",
        "description": "Easy 5k loops before work.",
        "member_count": 128,
        "joined": true
    }
]"#;

#[derive(Default)]
struct FakeProvider {
	session: Mutex<Option<Session>>,
	next_token: Mutex<Option<String>>,
	refresh_calls: AtomicU32,
	sign_outs: AtomicU32,
}
impl FakeProvider {
	fn signed_in(token: &str) -> Arc<Self> {
		Arc::new(Self {
			session: Mutex::new(Some(Session::new(token, None))),
			..Self::default()
		})
	}

	fn with_next_token(self: Arc<Self>, token: &str) -> Arc<Self> {
		*self.next_token.lock().unwrap() = Some(token.to_string());

		self
	}
}
#[async_trait]
impl SessionProvider for FakeProvider {
	async fn current_session(&self) -> Option<Session> {
		self.session.lock().unwrap().clone()
	}

	async fn refresh_session(&self) -> Result<Session> {
		self.refresh_calls.fetch_add(1, Ordering::SeqCst);

		match self.next_token.lock().unwrap().clone() {
			Some(token) => {
				let session = Session::new(token, None);

				*self.session.lock().unwrap() = Some(session.clone());

				Ok(session)
			},
			None => Err(Error::Security("refresh token revoked".into())),
		}
	}

	async fn sign_out(&self) {
		self.sign_outs.fetch_add(1, Ordering::SeqCst);
		*self.session.lock().unwrap() = None;
	}
}

fn client_for(server: &MockServer, provider: Arc<FakeProvider>) -> ApiClient {
	ApiClient::builder()
		.base_url(server.uri())
		.require_https(false)
		.build(provider)
		.expect("client")
}

fn bearer_of(request: &wiremock::Request) -> Option<String> {
	request
		.headers
		.get("authorization")
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "))
		.map(|token| token.to_string())
}

#[tokio::test]
async fn bearer_token_is_attached_from_the_session() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/v1/groups"))
		.respond_with(move |request: &wiremock::Request| {
			if bearer_of(request).as_deref() == Some("token-a") {
				ResponseTemplate::new(200)
					.set_body_string(GROUPS_BODY)
					.insert_header("content-type", "application/json")
			} else {
				ResponseTemplate::new(401)
			}
		})
		.expect(1)
		.mount(&server)
		.await;

	let provider = FakeProvider::signed_in("token-a");
	let client = client_for(&server, provider.clone());
	let groups: Vec<serde_json::Value> = client.get_json("v1/groups").await.expect("groups");

	assert_eq!(groups.len(), 1);
	assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);

	server.verify().await;
}

#[tokio::test]
async fn unauthorized_response_refreshes_once_and_retries_once() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let requests_seen = Arc::new(AtomicU32::new(0));
	let counter = requests_seen.clone();

	Mock::given(method("GET"))
		.and(path("/v1/groups"))
		.respond_with(move |request: &wiremock::Request| {
			counter.fetch_add(1, Ordering::SeqCst);

			if bearer_of(request).as_deref() == Some("token-b") {
				ResponseTemplate::new(200)
					.set_body_string(GROUPS_BODY)
					.insert_header("content-type", "application/json")
			} else {
				ResponseTemplate::new(401)
			}
		})
		.mount(&server)
		.await;

	let provider = FakeProvider::signed_in("token-a").with_next_token("token-b");
	let client = client_for(&server, provider.clone());
	let groups: Vec<serde_json::Value> = client.get_json("v1/groups").await.expect("groups");

	assert_eq!(groups.len(), 1);
	assert_eq!(requests_seen.load(Ordering::SeqCst), 2, "expected original send plus one resend");
	assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
	assert_eq!(provider.sign_outs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn a_second_unauthorized_after_refresh_is_terminal() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let requests_seen = Arc::new(AtomicU32::new(0));
	let counter = requests_seen.clone();

	Mock::given(method("GET"))
		.and(path("/v1/feed"))
		.respond_with(move |_: &wiremock::Request| {
			counter.fetch_add(1, Ordering::SeqCst);

			ResponseTemplate::new(401)
		})
		.mount(&server)
		.await;

	let provider = FakeProvider::signed_in("token-a").with_next_token("token-b");
	let client = client_for(&server, provider.clone());
	let err = client.get_json::<Vec<serde_json::Value>>("v1/feed").await.unwrap_err();

	assert!(matches!(err, Error::Unauthorized { .. }));
	assert_eq!(requests_seen.load(Ordering::SeqCst), 2, "one retry only, no refresh loop");
	assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_failure_signs_the_user_out_and_propagates() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/v1/groups"))
		.respond_with(ResponseTemplate::new(401))
		.expect(1)
		.mount(&server)
		.await;

	let provider = FakeProvider::signed_in("token-a");
	let client = client_for(&server, provider.clone());
	let err = client.get_json::<Vec<serde_json::Value>>("v1/groups").await.unwrap_err();

	assert!(matches!(err, Error::SessionExpired { .. }));
	assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
	assert_eq!(provider.sign_outs.load(Ordering::SeqCst), 1);

	server.verify().await;
}

#[tokio::test]
async fn client_errors_other_than_unauthorized_pass_through() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/v1/groups/g-9"))
		.respond_with(ResponseTemplate::new(404).set_body_string("no such group"))
		.expect(1)
		.mount(&server)
		.await;

	let provider = FakeProvider::signed_in("token-a");
	let client = client_for(&server, provider.clone());
	let err = client.get_json::<serde_json::Value>("v1/groups/g-9").await.unwrap_err();

	match err {
		Error::HttpStatus { status, body, .. } => {
			assert_eq!(status.as_u16(), 404);
			assert_eq!(body.as_deref(), Some("no such group"));
		},
		other => panic!("expected HttpStatus, got {other:?}"),
	}

	assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);

	server.verify().await;
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/v1/groups"))
		.respond_with(move |request: &wiremock::Request| {
			if bearer_of(request).as_deref() == Some("token-b") {
				ResponseTemplate::new(200)
					.set_body_string(GROUPS_BODY)
					.insert_header("content-type", "application/json")
			} else {
				ResponseTemplate::new(401)
			}
		})
		.mount(&server)
		.await;

	let provider = FakeProvider::signed_in("token-a").with_next_token("token-b");
	let client = client_for(&server, provider.clone());
	let mut handles = Vec::new();

	for _ in 0..4 {
		let client = client.clone();

		handles.push(tokio::spawn(async move {
			client.get_json::<Vec<serde_json::Value>>("v1/groups").await
		}));
	}

	for handle in handles {
		let groups = handle.await.expect("join").expect("groups");

		assert_eq!(groups.len(), 1);
	}

	assert_eq!(
		provider.refresh_calls.load(Ordering::SeqCst),
		1,
		"concurrent 401s must share a single refresh"
	);
}

#[tokio::test]
async fn requests_without_a_session_carry_no_bearer_header() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/v1/groups"))
		.respond_with(move |request: &wiremock::Request| {
			if request.headers.contains_key("authorization") {
				ResponseTemplate::new(500).set_body_string("unexpected credential")
			} else {
				ResponseTemplate::new(200)
					.set_body_string("[]")
					.insert_header("content-type", "application/json")
			}
		})
		.expect(1)
		.mount(&server)
		.await;

	let provider = Arc::new(FakeProvider::default());
	let client = client_for(&server, provider);
	let groups: Vec<serde_json::Value> = client.get_json("v1/groups").await.expect("groups");

	assert!(groups.is_empty());

	server.verify().await;
}
