#![cfg(feature = "reqwest")]

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use httpmock::prelude::*;
use serde_json::json;
use tokio::{net::TcpListener, sync::Notify};
// self
use timeslip_auth::{
	_preludet::*,
	auth::{ClientId, ProviderId},
	flows::AuthorizationCodeAcquirer,
	provider::ProviderDescriptor,
	redirect::{BrowserSurface, BrowsingContext, LoopbackHttpRedirect, SurfaceClosed},
};

#[derive(Clone, Copy)]
enum UserAction {
	/// Follows the consent page and lands on the redirect with these parameters.
	Redirect(&'static str),
	/// Lands on the redirect with these parameters and no echoed state.
	Forge(&'static str),
	/// Closes the window without answering.
	Close,
	/// Leaves the window open forever.
	Ignore,
}

/// Browsing context that simulates the user from the authorization URL it is asked to open.
struct ScriptedBrowser {
	action: UserAction,
	closes: Arc<AtomicUsize>,
	opened: Mutex<Option<Url>>,
}
impl ScriptedBrowser {
	fn new(action: UserAction) -> Arc<Self> {
		Arc::new(Self { action, closes: Arc::new(AtomicUsize::new(0)), opened: Mutex::new(None) })
	}

	fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	fn redirect_uri(&self) -> Url {
		let opened = self.opened.lock().clone().expect("Authorization page should have been opened.");
		let redirect = opened
			.query_pairs()
			.find(|(key, _)| key == "redirect_uri")
			.map(|(_, value)| value.into_owned())
			.expect("Authorization URL should carry a redirect URI.");

		Url::parse(&redirect).expect("Redirect URI should parse.")
	}
}
impl BrowsingContext for ScriptedBrowser {
	fn open(&self, url: &Url) -> Result<Box<dyn BrowserSurface>> {
		*self.opened.lock() = Some(url.clone());

		let closed = Arc::new(Notify::new());

		match self.action {
			UserAction::Redirect(query) => {
				let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
				let target = format!("{}?{query}&state={}", pairs["redirect_uri"], pairs["state"]);

				tokio::spawn(async move {
					let _ = test_reqwest_http_client().0.get(target).send().await;
				});
			},
			UserAction::Forge(query) => {
				let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
				let target = format!("{}?{query}", pairs["redirect_uri"]);

				tokio::spawn(async move {
					let _ = test_reqwest_http_client().0.get(target).send().await;
				});
			},
			UserAction::Close => closed.notify_one(),
			UserAction::Ignore => {},
		}

		Ok(Box::new(ScriptedSurface { closed, closes: self.closes.clone() }))
	}
}

struct ScriptedSurface {
	closed: Arc<Notify>,
	closes: Arc<AtomicUsize>,
}
impl BrowserSurface for ScriptedSurface {
	fn closed(&self) -> SurfaceClosed<'_> {
		Box::pin(self.closed.notified())
	}

	fn close(&self) {
		self.closes.fetch_add(1, Ordering::SeqCst);
	}
}

fn descriptor(intermediary: &str) -> ProviderDescriptor {
	ProviderDescriptor::builder(
		ProviderId::new("freeagent").expect("Provider identifier should be valid."),
		ClientId::new("client-desktop").expect("Client identifier should be valid."),
	)
	.authorization_endpoint(
		Url::parse("https://api.freeagent.com/v2/approve_app")
			.expect("Authorization endpoint should parse."),
	)
	.api_base(Url::parse("https://api.freeagent.com/v2").expect("API base should parse."))
	.intermediary(Url::parse(intermediary).expect("Intermediary should parse."))
	.scope("read write")
	.build()
	.expect("Provider descriptor should build.")
}

fn loopback(browser: &Arc<ScriptedBrowser>) -> LoopbackHttpRedirect {
	let context: Arc<dyn BrowsingContext> = browser.clone();

	LoopbackHttpRedirect::new(context).with_port(0).with_public_host("127.0.0.1")
}

fn acquirer(browser: &Arc<ScriptedBrowser>) -> AuthorizationCodeAcquirer {
	AuthorizationCodeAcquirer::new(
		Arc::new(descriptor("http://127.0.0.1:3000")),
		loopback(browser).into(),
	)
}

async fn assert_port_released(uri: &Url) {
	let port = uri.port().expect("Loopback redirect URI should carry a port.");

	TcpListener::bind(("127.0.0.1", port))
		.await
		.expect("Loopback port should be free once the flow ends.");
}

#[tokio::test]
async fn redirect_with_code_yields_grant_and_releases_listener() {
	let browser = ScriptedBrowser::new(UserAction::Redirect("code=abc123"));
	let grant = acquirer(&browser).acquire().await.expect("Code should be captured.");

	assert_eq!(grant.code, "abc123");
	assert_eq!(grant.redirect_uri, browser.redirect_uri());
	assert_eq!(grant.redirect_uri.path(), "/oauth/callback");
	assert_eq!(browser.closes(), 1);

	assert_port_released(&grant.redirect_uri).await;
}

#[tokio::test]
async fn denied_consent_closes_surface_and_releases_port() {
	let browser = ScriptedBrowser::new(UserAction::Redirect("error=access_denied"));
	let err = acquirer(&browser).acquire().await.expect_err("Declined consent must fail.");

	match err {
		Error::AuthorizationDenied { reason } => assert_eq!(reason, "access_denied"),
		other => panic!("Unexpected error: {other:?}."),
	}

	assert_eq!(browser.closes(), 1);

	assert_port_released(&browser.redirect_uri()).await;
}

#[tokio::test]
async fn closed_window_is_incomplete() {
	let browser = ScriptedBrowser::new(UserAction::Close);
	let err = acquirer(&browser).acquire().await.expect_err("Closed window must fail.");

	assert!(matches!(err, Error::AuthorizationIncomplete { .. }));
	assert!(err.is_retryable());

	assert_port_released(&browser.redirect_uri()).await;
}

#[tokio::test]
async fn silent_window_times_out() {
	let browser = ScriptedBrowser::new(UserAction::Ignore);
	let err = acquirer(&browser)
		.with_timeout(Duration::milliseconds(100))
		.acquire()
		.await
		.expect_err("Silent window must time out.");

	assert!(matches!(err, Error::AuthorizationTimeout { waited } if waited == Duration::milliseconds(100)));
	assert_eq!(browser.closes(), 1);

	assert_port_released(&browser.redirect_uri()).await;
}

#[tokio::test]
async fn mismatched_state_is_rejected() {
	let browser = ScriptedBrowser::new(UserAction::Forge("code=abc123&state=forged"));
	let err = acquirer(&browser).acquire().await.expect_err("Forged state must fail.");

	assert!(matches!(err, Error::AuthorizationDenied { .. }), "unexpected error: {err:?}");
}

#[tokio::test]
async fn desktop_authentication_end_to_end() {
	let server = MockServer::start_async().await;
	let browser = ScriptedBrowser::new(UserAction::Redirect("code=abc123"));
	let (connection, store, _) =
		build_reqwest_test_connection(descriptor(&server.base_url()), loopback(&browser).into());
	let exchange = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/freeagent/token").body_includes("\"code\":\"abc123\"");
			then.status(200).header("content-type", "application/json").body(
				json!({
					"access_token": "AT1",
					"refresh_token": "RT1",
					"expires_in": 3600,
					"token_type": "Bearer",
				})
				.to_string(),
			);
		})
		.await;
	let record = connection.authenticate().await.expect("Desktop authentication should succeed.");

	exchange.assert_async().await;

	assert_eq!(record.access_token.expose(), "AT1");
	assert!(store.contains_key("freeagent.tokens"));
	assert!(connection.is_connected().await.expect("Connection flag should be readable."));
}
