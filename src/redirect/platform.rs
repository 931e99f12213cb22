// self
use crate::{
	_prelude::*,
	redirect::{CallbackParams, RedirectCapture, std_timeout},
};

/// Boxed future returned by platform redirect handlers.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// Reasons a platform-managed authorization window ends without a redirect.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PlatformRedirectError {
	/// The user closed the window.
	#[error("The authorization window was closed.")]
	Cancelled,
	/// The platform reported a failure.
	#[error("The platform redirect failed: {message}.")]
	Failed {
		/// Platform-supplied message.
		message: String,
	},
}

/// Host capability that opens an interactive window and intercepts navigation to its own
/// callback URL (a browser extension's identity API, for instance).
pub trait PlatformRedirectHandler
where
	Self: Send + Sync,
{
	/// Callback URL owned by the platform.
	fn redirect_uri(&self) -> Url;

	/// Opens `url` and resolves with the full redirect URL once the provider navigates back.
	fn launch_web_auth_flow<'a>(
		&'a self,
		url: &'a Url,
	) -> PlatformFuture<'a, Result<Url, PlatformRedirectError>>;

	/// Closes any window still open. Called when the wait is abandoned.
	fn cancel(&self) {}
}

/// Redirect variant backed by a [`PlatformRedirectHandler`].
#[derive(Clone)]
pub struct PlatformProvidedRedirect {
	handler: Arc<dyn PlatformRedirectHandler>,
}
impl PlatformProvidedRedirect {
	/// Wraps a host handler.
	pub fn new(handler: Arc<dyn PlatformRedirectHandler>) -> Self {
		Self { handler }
	}

	pub(crate) async fn capture<F>(&self, build_url: F, timeout: Duration) -> Result<RedirectCapture>
	where
		F: Send + FnOnce(&Url) -> Url,
	{
		let redirect_uri = self.handler.redirect_uri();
		let authorize_url = build_url(&redirect_uri);
		let guard = CancelOnDrop { handler: self.handler.as_ref(), armed: true };
		let waited =
			tokio::time::timeout(std_timeout(timeout), self.handler.launch_web_auth_flow(&authorize_url))
				.await;
		let outcome = match waited {
			Err(_) => Err(Error::AuthorizationTimeout { waited: timeout }),
			Ok(Err(PlatformRedirectError::Cancelled)) => Err(Error::AuthorizationIncomplete {
				reason: "the authorization window was closed".into(),
			}),
			Ok(Err(PlatformRedirectError::Failed { message })) =>
				Err(Error::AuthorizationIncomplete { reason: message }),
			Ok(Ok(redirect)) =>
				Ok(RedirectCapture { redirect_uri, params: CallbackParams::from_url(&redirect) }),
		};

		// The platform already tore the window down when it returned a redirect or a cancellation.
		if !matches!(outcome, Err(Error::AuthorizationTimeout { .. })) {
			guard.disarm();
		}

		outcome
	}
}
impl Debug for PlatformProvidedRedirect {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PlatformProvidedRedirect")
			.field("redirect_uri", &self.handler.redirect_uri().as_str())
			.finish()
	}
}

struct CancelOnDrop<'a> {
	handler: &'a dyn PlatformRedirectHandler,
	armed: bool,
}
impl CancelOnDrop<'_> {
	fn disarm(mut self) {
		self.armed = false;
	}
}
impl Drop for CancelOnDrop<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.handler.cancel();
		}
	}
}
