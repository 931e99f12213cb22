#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use serde_json::json;
use time::macros;
// self
use timeslip_auth::{
	_preludet::*,
	api::{ApiError, NewTimeslip},
	auth::{ClientId, ProviderId, TokenRecord},
	clock::Clock,
	error::ConfigError,
	flows::RequestOptions,
	provider::ProviderDescriptor,
	redirect::{
		PlatformFuture, PlatformProvidedRedirect, PlatformRedirectError, PlatformRedirectHandler,
	},
	store::{KeyValueStore, MemoryStore, TokenStore},
};

struct UnusedRedirect;
impl PlatformRedirectHandler for UnusedRedirect {
	fn redirect_uri(&self) -> Url {
		Url::parse("https://ext-id.chromiumapp.org/").expect("Redirect fixture should parse.")
	}

	fn launch_web_auth_flow<'a>(
		&'a self,
		_: &'a Url,
	) -> PlatformFuture<'a, Result<Url, PlatformRedirectError>> {
		Box::pin(async { Err(PlatformRedirectError::Cancelled) })
	}
}

fn descriptor(server: &MockServer) -> ProviderDescriptor {
	ProviderDescriptor::builder(
		ProviderId::new("freeagent").expect("Provider identifier should be valid."),
		ClientId::new("client-request").expect("Client identifier should be valid."),
	)
	.authorization_endpoint(
		Url::parse("https://api.freeagent.com/v2/approve_app")
			.expect("Authorization endpoint should parse."),
	)
	.api_base(Url::parse(&server.url("/v2")).expect("API base should parse."))
	.intermediary(Url::parse(&server.base_url()).expect("Intermediary should parse."))
	.scope("read write")
	.build()
	.expect("Provider descriptor should build.")
}

/// Connection seeded with a valid `AT1`/`RT1` record.
async fn connected(
	server: &MockServer,
) -> (ReqwestTestConnection, Arc<MemoryStore>, Arc<timeslip_auth::clock::ManualClock>) {
	let listener = PlatformProvidedRedirect::new(Arc::new(UnusedRedirect)).into();
	let (connection, store, clock) = build_reqwest_test_connection(descriptor(server), listener);
	let backend: Arc<dyn KeyValueStore> = store.clone();
	let record = TokenRecord::builder()
		.access_token("AT1")
		.refresh_token("RT1")
		.issued_at(clock.now())
		.expires_in(Duration::hours(1))
		.build()
		.expect("Seed record should build.");
	let tokens = TokenStore::new(backend);

	tokens.save_tokens(&record).await.expect("Seeding the token record should succeed.");
	tokens.set_connected(true).await.expect("Seeding the connection flag should succeed.");

	(connection, store, clock)
}

fn refreshed_body() -> String {
	json!({
		"access_token": "AT2",
		"refresh_token": "RT2",
		"expires_in": 3600,
		"token_type": "Bearer",
	})
	.to_string()
}

#[tokio::test]
async fn revoked_access_token_is_refreshed_and_retried_once() {
	let server = MockServer::start_async().await;
	let (connection, _, _) = connected(&server).await;
	let rejected = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/users/me").header("authorization", "Bearer AT1");
			then.status(401).body("");
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/freeagent/refresh")
				.json_body(json!({ "refresh_token": "RT1" }));
			then.status(200).header("content-type", "application/json").body(refreshed_body());
		})
		.await;
	let accepted = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v2/users/me")
				.header("authorization", "Bearer AT2")
				.header("accept", "application/json");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"user":{"url":"https://api.freeagent.com/v2/users/1","email":"a@b.c"}}"#);
		})
		.await;
	let response = connection
		.api_request("/users/me", &RequestOptions::get())
		.await
		.expect("Request should succeed after one refresh.");

	assert_eq!(response.status.as_u16(), 200);
	assert!(response.text().contains("users/1"));

	rejected.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;
	accepted.assert_calls_async(1).await;

	let tokens = connection.get_tokens().await.expect("Refreshed record should be cached.");

	assert_eq!(tokens.access_token.expose(), "AT2");
}

#[tokio::test]
async fn second_unauthorized_is_returned_without_another_refresh() {
	let server = MockServer::start_async().await;
	let (connection, _, _) = connected(&server).await;
	let api = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/projects");
			then.status(401).body(r#"{"errors":{"error":{"message":"Access denied"}}}"#);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/freeagent/refresh");
			then.status(200).header("content-type", "application/json").body(refreshed_body());
		})
		.await;
	let response = connection
		.api_request("/projects", &RequestOptions::get())
		.await
		.expect("Second 401 should be returned, not raised.");

	assert_eq!(response.status.as_u16(), 401);
	assert!(response.text().contains("Access denied"));

	api.assert_calls_async(2).await;
	refresh.assert_calls_async(1).await;
}

#[tokio::test]
async fn non_auth_failures_pass_through_unmodified() {
	let server = MockServer::start_async().await;
	let (connection, _, _) = connected(&server).await;
	let api = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v2/timeslips")
				.header("content-type", "application/json")
				.body(r#"{"timeslip":{}}"#);
			then.status(422)
				.header("content-type", "application/json")
				.body(r#"{"errors":[{"message":"Task can't be blank"}]}"#);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/freeagent/refresh");
			then.status(200).header("content-type", "application/json").body(refreshed_body());
		})
		.await;
	let response = connection
		.api_request("/timeslips", &RequestOptions::post(r#"{"timeslip":{}}"#))
		.await
		.expect("Validation errors should be returned, not raised.");

	assert_eq!(response.status.as_u16(), 422);
	assert!(!response.is_success());

	api.assert_calls_async(1).await;
	refresh.assert_calls_async(0).await;
}

#[tokio::test]
async fn rejected_refresh_after_unauthorized_requires_reauthentication() {
	let server = MockServer::start_async().await;
	let (connection, store, _) = connected(&server).await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/users/me");
			then.status(401);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/freeagent/refresh");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"Token refresh failed","details":{"error":"invalid_grant"}}"#);
		})
		.await;

	let err = connection
		.api_request("/users/me", &RequestOptions::get())
		.await
		.expect_err("Rejected refresh must surface.");

	assert!(matches!(err, Error::ReauthenticationRequired { .. }));
	assert!(store.is_empty());
}

#[tokio::test]
async fn credentials_are_never_sent_to_foreign_hosts() {
	let server = MockServer::start_async().await;
	let (connection, _, _) = connected(&server).await;
	let any = server
		.mock_async(|when, then| {
			when.any_request();
			then.status(200);
		})
		.await;
	let err = connection
		.api_request("https://evil.example.com/v2/users/me", &RequestOptions::get())
		.await
		.expect_err("Foreign endpoints must be refused.");

	assert!(matches!(err, Error::Config(ConfigError::ForeignEndpoint { .. })));

	any.assert_calls_async(0).await;
}

#[tokio::test]
async fn absolute_urls_under_the_api_base_are_accepted() {
	let server = MockServer::start_async().await;
	let (connection, _, _) = connected(&server).await;
	let api = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/tasks").query_param("project", "7");
			then.status(200).header("content-type", "application/json").body(r#"{"tasks":[]}"#);
		})
		.await;
	let response = connection
		.api_request(&server.url("/v2/tasks?project=7"), &RequestOptions::get())
		.await
		.expect("Absolute URL under the API base should be accepted.");

	assert!(response.is_success());

	api.assert_async().await;
}

#[tokio::test]
async fn typed_api_reads_user_and_posts_timeslip() {
	let server = MockServer::start_async().await;
	let (connection, _, _) = connected(&server).await;
	let api = connection.accounting_api();
	let user = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/users/me");
			then.status(200).header("content-type", "application/json").body(
				json!({
					"user": {
						"url": server.url("/v2/users/1"),
						"first_name": "Ada",
						"last_name": "Lovelace",
						"email": "ada@example.com",
					}
				})
				.to_string(),
			);
		})
		.await;
	let timeslip = server
		.mock_async(|when, then| {
			when.method(POST).path("/v2/timeslips").json_body(json!({
				"timeslip": {
					"task": server.url("/v2/tasks/3"),
					"user": server.url("/v2/users/1"),
					"project": server.url("/v2/projects/2"),
					"dated_on": "2025-03-14",
					"hours": 1.5,
					"comment": "Pairing",
				}
			}));
			then.status(201).header("content-type", "application/json").body(
				json!({
					"timeslip": {
						"url": server.url("/v2/timeslips/9"),
						"task": server.url("/v2/tasks/3"),
						"user": server.url("/v2/users/1"),
						"project": server.url("/v2/projects/2"),
						"dated_on": "2025-03-14",
						"hours": "1.5",
						"comment": "Pairing",
					}
				})
				.to_string(),
			);
		})
		.await;
	let me = api.current_user().await.expect("Current user should decode.");

	assert_eq!(me.email.as_deref(), Some("ada@example.com"));

	let created = api
		.create_timeslip(&NewTimeslip {
			task: server.url("/v2/tasks/3"),
			user: me.url.clone(),
			project: server.url("/v2/projects/2"),
			dated_on: macros::date!(2025 - 03 - 14),
			hours: 1.5,
			comment: Some("Pairing".into()),
		})
		.await
		.expect("Timeslip should be created.");

	assert_eq!(created.hours, "1.5");
	assert!(created.url.ends_with("/v2/timeslips/9"));

	user.assert_async().await;
	timeslip.assert_async().await;
}

#[tokio::test]
async fn typed_api_surfaces_non_success_statuses() {
	let server = MockServer::start_async().await;
	let (connection, _, _) = connected(&server).await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/contacts");
			then.status(503).body("Service Unavailable");
		})
		.await;

	let err = connection.accounting_api().contacts().await.expect_err("503 must surface.");

	match err {
		ApiError::Status { status, body } => {
			assert_eq!(status, 503);
			assert_eq!(body, "Service Unavailable");
		},
		other => panic!("Unexpected error: {other:?}."),
	}
}
