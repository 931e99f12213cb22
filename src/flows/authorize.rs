//! Interactive acquisition of a single-use authorization code.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	obs::{Flow, FlowKind},
	provider::ProviderDescriptor,
	redirect::RedirectListener,
};

/// Bounded wait for the redirect when none is configured.
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::minutes(5);

const STATE_LEN: usize = 32;

/// Authorization code plus the redirect URI it is bound to.
#[derive(Clone)]
pub struct AuthorizationGrant {
	/// Single-use code; consumed by the code exchange.
	pub code: String,
	/// Redirect URI the code was issued for; the exchange must echo it.
	pub redirect_uri: Url,
}
impl Debug for AuthorizationGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationGrant")
			.field("code", &"<redacted>")
			.field("redirect_uri", &self.redirect_uri.as_str())
			.finish()
	}
}

/// Drives the browser-based consent step through a [`RedirectListener`].
#[derive(Clone, Debug)]
pub struct AuthorizationCodeAcquirer {
	descriptor: Arc<ProviderDescriptor>,
	listener: RedirectListener,
	timeout: Duration,
}
impl AuthorizationCodeAcquirer {
	/// Creates an acquirer with the default five-minute timeout.
	pub fn new(descriptor: Arc<ProviderDescriptor>, listener: RedirectListener) -> Self {
		Self { descriptor, listener, timeout: DEFAULT_AUTHORIZATION_TIMEOUT }
	}

	/// Overrides the bounded wait.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Builds `<authorization>?client_id=..&response_type=code&redirect_uri=..&scope=..&state=..`.
	pub fn authorization_url(&self, redirect_uri: &Url, state: &str) -> Url {
		let mut url = self.descriptor.endpoints.authorization.clone();
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("client_id", self.descriptor.client_id.as_ref());
		pairs.append_pair("response_type", "code");
		pairs.append_pair("redirect_uri", redirect_uri.as_str());
		pairs.append_pair("scope", &self.descriptor.scope);
		pairs.append_pair("state", state);

		drop(pairs);

		url
	}

	/// Opens the consent page and waits for the redirect.
	///
	/// The surface is closed and any loopback listener released before this returns, whatever
	/// the outcome.
	pub async fn acquire(&self) -> Result<AuthorizationGrant> {
		Flow::new(FlowKind::Authorize, &self.descriptor.id, "acquire").observe(async {
			let state = random_state();
			let capture = self
				.listener
				.capture(|redirect_uri| self.authorization_url(redirect_uri, &state), self.timeout)
				.await?;
			let code = capture.params.into_code(&state)?;

			Ok(AuthorizationGrant { code, redirect_uri: capture.redirect_uri })
		})
		.await
	}
}

fn random_state() -> String {
	rand::rng().sample_iter(Alphanumeric).take(STATE_LEN).map(char::from).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::ClientId,
		redirect::{PlatformFuture, PlatformProvidedRedirect, PlatformRedirectError, PlatformRedirectHandler},
	};

	struct EchoStateHandler {
		query: &'static str,
	}
	impl PlatformRedirectHandler for EchoStateHandler {
		fn redirect_uri(&self) -> Url {
			Url::parse("https://ext-id.chromiumapp.org/").expect("Redirect fixture should parse.")
		}

		fn launch_web_auth_flow<'a>(
			&'a self,
			url: &'a Url,
		) -> PlatformFuture<'a, Result<Url, PlatformRedirectError>> {
			let state = url
				.query_pairs()
				.find(|(k, _)| k == "state")
				.map(|(_, v)| v.into_owned())
				.unwrap_or_default();
			let mut redirect = self.redirect_uri();

			redirect.set_query(Some(&format!("{}&state={state}", self.query)));

			Box::pin(async move { Ok(redirect) })
		}
	}

	fn acquirer(query: &'static str) -> AuthorizationCodeAcquirer {
		let descriptor = ProviderDescriptor::freeagent(
			ClientId::new("client-1").expect("Client fixture should be valid."),
			Url::parse("https://proxy.example.com").expect("Intermediary fixture should parse."),
		)
		.expect("FreeAgent preset should build.");
		let listener = PlatformProvidedRedirect::new(Arc::new(EchoStateHandler { query }));

		AuthorizationCodeAcquirer::new(Arc::new(descriptor), listener.into())
	}

	#[test]
	fn authorization_url_carries_required_parameters() {
		let acquirer = acquirer("code=abc123");
		let redirect = Url::parse("http://localhost:8080/oauth/callback").expect("URL should parse.");
		let url = acquirer.authorization_url(&redirect, "xyz");
		let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();

		assert!(url.as_str().starts_with("https://api.freeagent.com/v2/approve_app?"));
		assert_eq!(pairs["client_id"], "client-1");
		assert_eq!(pairs["response_type"], "code");
		assert_eq!(pairs["redirect_uri"], "http://localhost:8080/oauth/callback");
		assert_eq!(pairs["scope"], "read write");
		assert_eq!(pairs["state"], "xyz");
	}

	#[tokio::test]
	async fn acquire_returns_code_bound_to_redirect() {
		let grant = acquirer("code=abc123").acquire().await.expect("Code should be acquired.");

		assert_eq!(grant.code, "abc123");
		assert_eq!(grant.redirect_uri.as_str(), "https://ext-id.chromiumapp.org/");
		assert!(format!("{grant:?}").contains("<redacted>"));
	}

	#[tokio::test]
	async fn provider_error_is_denied() {
		let err = acquirer("error=access_denied")
			.acquire()
			.await
			.expect_err("Declined consent must fail.");

		assert!(matches!(err, Error::AuthorizationDenied { .. }));
	}

	#[test]
	fn states_are_random_and_alphanumeric() {
		let a = random_state();
		let b = random_state();

		assert_eq!(a.len(), STATE_LEN);
		assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(a, b);
	}
}
