//! Crate-level error taxonomy shared by the authorization flow, lifecycle manager, request client,
//! and intermediary.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
///
/// Every network or parse failure is converted into one of these variants at the boundary where
/// it occurs; raw transport errors never escape.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The user or provider rejected the interactive consent step.
	#[error("Authorization was denied: {reason}.")]
	AuthorizationDenied {
		/// Provider-supplied `error` value or local reason.
		reason: String,
	},
	/// The interactive flow ended without producing a code.
	#[error("Authorization did not complete: {reason}.")]
	AuthorizationIncomplete {
		/// Why the flow ended without a result.
		reason: String,
	},
	/// No redirect arrived within the bounded wait.
	#[error("Authorization timed out after {waited}.")]
	AuthorizationTimeout {
		/// Duration the flow waited before giving up.
		waited: Duration,
	},
	/// The intermediary or provider rejected an authorization-code exchange, or answered with a
	/// malformed token response.
	#[error("Token exchange failed: {detail}.")]
	ExchangeFailed {
		/// HTTP status returned by the intermediary, when one was received.
		status: Option<u16>,
		/// Diagnostic payload relayed from the intermediary.
		detail: String,
	},
	/// The intermediary or provider rejected a refresh-token exchange.
	#[error("Refresh token exchange failed: {detail}.")]
	RefreshExchangeFailed {
		/// HTTP status returned by the intermediary.
		status: Option<u16>,
		/// Diagnostic payload relayed from the intermediary.
		detail: String,
	},
	/// Refresh was invoked on a session that never authenticated.
	#[error("No refresh token is available; authenticate first.")]
	NoRefreshToken,
	/// A refresh attempt definitively failed; local token state has been cleared and the full
	/// interactive flow must run again.
	#[error("Reauthentication required: {reason}.")]
	ReauthenticationRequired {
		/// Why the session could not be recovered.
		reason: String,
	},
	/// A request was attempted with no valid or recoverable token.
	#[error("Not authenticated.")]
	NotAuthenticated,
}
impl Error {
	/// Returns `true` when the UI should offer a "reconnect" affordance.
	pub fn requires_reconnect(&self) -> bool {
		matches!(self, Self::ReauthenticationRequired { .. } | Self::NotAuthenticated)
	}

	/// Returns `true` when the UI should offer a manual "retry" affordance.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::AuthorizationIncomplete { .. }
				| Self::AuthorizationTimeout { .. }
				| Self::ExchangeFailed { .. }
				| Self::RefreshExchangeFailed { .. }
				| Self::Transport(_)
		)
	}

	pub(crate) fn malformed_token_response(detail: impl Into<String>) -> Self {
		Self::ExchangeFailed { status: None, detail: detail.into() }
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// An endpoint URL could not be derived from the descriptor.
	#[error("Endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A request URL resolves outside the configured API origin or base path.
	#[error("Refusing to send credentials to foreign endpoint {url}.")]
	ForeignEndpoint {
		/// Offending URL.
		url: String,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestBody(#[source] serde_json::Error),
	/// The loopback redirect listener could not be bound.
	#[error("Loopback listener could not bind {addr}.")]
	LoopbackBind {
		/// Address the listener attempted to bind.
		addr: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// The browsing context could not be opened.
	#[error("Browser could not open the authorization page: {message}.")]
	BrowserLaunch {
		/// Launcher-supplied description.
		message: String,
	},
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Which remote the request was addressed to.
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request timed out before a response arrived.
	#[error("Request to {target} timed out.")]
	Timeout {
		/// Which remote the request was addressed to.
		target: &'static str,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(target: &'static str, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { target, source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn reconnect_and_retry_affordances_are_disjoint() {
		let reconnect = [
			Error::NotAuthenticated,
			Error::ReauthenticationRequired { reason: "refresh rejected".into() },
		];
		let retry = [
			Error::AuthorizationIncomplete { reason: "window closed".into() },
			Error::AuthorizationTimeout { waited: Duration::minutes(5) },
			Error::ExchangeFailed { status: Some(400), detail: "bad code".into() },
			Error::RefreshExchangeFailed { status: Some(400), detail: "bad refresh".into() },
		];

		for err in &reconnect {
			assert!(err.requires_reconnect());
			assert!(!err.is_retryable());
		}
		for err in &retry {
			assert!(err.is_retryable());
			assert!(!err.requires_reconnect());
		}

		let denied = Error::AuthorizationDenied { reason: "access_denied".into() };

		assert!(!denied.is_retryable());
		assert!(!denied.requires_reconnect());
	}

	#[test]
	fn exchange_failure_carries_detail() {
		let err = Error::ExchangeFailed { status: Some(401), detail: "invalid_client".into() };

		assert_eq!(err.to_string(), "Token exchange failed: invalid_client.");
	}
}
