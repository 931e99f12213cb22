//! Redirect capture for the interactive authorization step.
//!
//! [`RedirectListener`] is selected at startup by runtime environment: browser-extension style
//! hosts provide a platform callback ([`PlatformProvidedRedirect`]), desktop hosts bind a loopback
//! HTTP listener ([`LoopbackHttpRedirect`]). Both variants close the interactive surface and
//! release the listener on every exit path, including cancellation of the awaiting future.

mod browser;
mod loopback;
mod platform;

pub use browser::*;
pub use loopback::*;
pub use platform::*;

// self
use crate::_prelude::*;

/// Query parameters carried by the redirect back to the application.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
	/// Single-use authorization code.
	pub code: Option<String>,
	/// Provider error value (for example `access_denied`).
	pub error: Option<String>,
	/// Optional human-readable error description.
	pub error_description: Option<String>,
	/// Echoed `state` value.
	pub state: Option<String>,
}
impl CallbackParams {
	/// Extracts the recognised parameters from a redirect URL.
	pub fn from_url(url: &Url) -> Self {
		let mut params = Self::default();

		for (key, value) in url.query_pairs() {
			let slot = match key.as_ref() {
				"code" => &mut params.code,
				"error" => &mut params.error,
				"error_description" => &mut params.error_description,
				"state" => &mut params.state,
				_ => continue,
			};

			if slot.is_none() {
				*slot = Some(value.into_owned());
			}
		}

		params
	}

	/// Interprets the redirect, checking `error` first, then `state`, then `code`.
	pub fn into_code(self, expected_state: &str) -> Result<String> {
		if let Some(error) = self.error.filter(|e| !e.is_empty()) {
			let reason = match self.error_description {
				Some(description) if !description.is_empty() => format!("{error} ({description})"),
				_ => error,
			};

			return Err(Error::AuthorizationDenied { reason });
		}
		if let Some(state) = self.state
			&& state != expected_state
		{
			return Err(Error::AuthorizationDenied {
				reason: "redirect state does not match the request".into(),
			});
		}

		match self.code {
			Some(code) if !code.is_empty() => Ok(code),
			_ => Err(Error::AuthorizationIncomplete {
				reason: "redirect carried neither a code nor an error".into(),
			}),
		}
	}
}
impl Debug for CallbackParams {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CallbackParams")
			.field("code", &self.code.as_ref().map(|_| "<redacted>"))
			.field("error", &self.error)
			.field("error_description", &self.error_description)
			.field("state", &self.state)
			.finish()
	}
}

/// Redirect URI used for the attempt plus the parameters it came back with.
#[derive(Clone, Debug)]
pub struct RedirectCapture {
	/// Redirect URI embedded in the authorization URL; the exchange must echo it.
	pub redirect_uri: Url,
	/// Parameters carried by the redirect.
	pub params: CallbackParams,
}

/// Redirect capability with one variant per host environment.
#[derive(Clone, Debug)]
pub enum RedirectListener {
	/// Callback URL provided and intercepted by the host platform.
	Platform(PlatformProvidedRedirect),
	/// Short-lived HTTP listener on the loopback interface.
	Loopback(LoopbackHttpRedirect),
}
impl RedirectListener {
	/// Opens the authorization page built by `build_url` and waits for the redirect.
	///
	/// `build_url` receives the redirect URI chosen by the listener. Resolves with
	/// [`Error::AuthorizationIncomplete`] when the user closes the surface and with
	/// [`Error::AuthorizationTimeout`] once `timeout` elapses.
	pub async fn capture<F>(&self, build_url: F, timeout: Duration) -> Result<RedirectCapture>
	where
		F: Send + FnOnce(&Url) -> Url,
	{
		match self {
			Self::Platform(platform) => platform.capture(build_url, timeout).await,
			Self::Loopback(loopback) => loopback.capture(build_url, timeout).await,
		}
	}
}
impl From<PlatformProvidedRedirect> for RedirectListener {
	fn from(value: PlatformProvidedRedirect) -> Self {
		Self::Platform(value)
	}
}
impl From<LoopbackHttpRedirect> for RedirectListener {
	fn from(value: LoopbackHttpRedirect) -> Self {
		Self::Loopback(value)
	}
}

pub(crate) fn std_timeout(timeout: Duration) -> std::time::Duration {
	if timeout.is_negative() { std::time::Duration::ZERO } else { timeout.unsigned_abs() }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn params(query: &str) -> CallbackParams {
		CallbackParams::from_url(
			&Url::parse(&format!("https://ext.example/cb?{query}"))
				.expect("Callback fixture should parse."),
		)
	}

	#[test]
	fn error_wins_over_code() {
		let err = params("error=access_denied&code=abc")
			.into_code("s")
			.expect_err("Error parameter must deny the flow.");

		assert!(
			matches!(err, Error::AuthorizationDenied { ref reason } if reason == "access_denied")
		);
	}

	#[test]
	fn state_mismatch_is_denied_and_missing_state_is_tolerated() {
		let err = params("code=abc&state=other")
			.into_code("expected")
			.expect_err("State mismatch must deny the flow.");

		assert!(matches!(err, Error::AuthorizationDenied { .. }));
		assert_eq!(
			params("code=abc").into_code("expected").expect("Missing state should be accepted."),
			"abc"
		);
		assert_eq!(
			params("code=abc&state=expected")
				.into_code("expected")
				.expect("Matching state should be accepted."),
			"abc"
		);
	}

	#[test]
	fn neither_code_nor_error_is_incomplete() {
		let err = params("foo=bar").into_code("s").expect_err("Empty redirect must fail.");

		assert!(matches!(err, Error::AuthorizationIncomplete { .. }));
		assert!(format!("{:?}", params("code=secret")).contains("<redacted>"));
	}
}
