//! Upstream OAuth client used by the intermediary, plus the transport error mapping seam.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, RedirectUrl, RefreshToken, RequestTokenError, TokenUrl,
	basic::{BasicClient, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
	http::{HttpTransport, ResponseMetadata, ResponseMetadataSlot},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Grant types relayed by the intermediary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Authorization Code exchange.
	AuthorizationCode,
	/// Refresh token exchange.
	RefreshToken,
}
impl GrantType {
	/// Returns the RFC 6749 `grant_type` value.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::AuthorizationCode => "authorization_code",
			Self::RefreshToken => "refresh_token",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted while calling `target` into a crate error.
	fn map_transport_error(
		&self,
		target: &'static str,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		target: &'static str,
		_: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(target, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) =>
				TransportError::Network { target, source: message.into() }.into(),
			_ => TransportError::Network { target, source: "unknown HTTP client error".into() }
				.into(),
		}
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(target: &'static str, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransportError::Timeout { target }.into();
	}

	TransportError::network(target, err).into()
}

/// Successful upstream exchange, kept as raw bytes so it can be relayed verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamTokens {
	/// Upstream status (2xx).
	pub status: u16,
	/// Upstream body, untouched.
	pub body: Vec<u8>,
}

/// Failure modes of an upstream token call.
#[derive(Debug, ThisError)]
pub enum UpstreamError {
	/// The token endpoint answered with a non-success status.
	#[error("Token endpoint answered with status {status}.")]
	Rejected {
		/// Upstream status.
		status: u16,
		/// Upstream body, untouched.
		body: Vec<u8>,
	},
	/// The token endpoint answered success with a payload that is not a token response.
	#[error("Token endpoint answered with an unreadable payload: {message}.")]
	Malformed {
		/// Parser or protocol diagnostic.
		message: String,
	},
	/// The token endpoint could not be reached.
	#[error(transparent)]
	Unreachable(Error),
}

/// Secret-holding client for the provider token endpoint.
///
/// Requests are `application/x-www-form-urlencoded` and carry `client_id` and `client_secret`
/// in the body. The secret never leaves this type.
pub struct TokenEndpointClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> TokenEndpointClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a client for `token_url` using the supplied transport and mapper.
	pub fn new(
		token_url: &Url,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_url.to_string())
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let oauth_client = BasicClient::new(ClientId::new(client_id.into()))
			.set_client_secret(ClientSecret::new(client_secret.into()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		Ok(Self { oauth_client, http_client: http_client.into(), error_mapper: error_mapper.into() })
	}

	/// Exchanges an authorization code bound to `redirect_uri`.
	pub async fn exchange_code(
		&self,
		code: &str,
		redirect_uri: &str,
	) -> Result<UpstreamTokens, UpstreamError> {
		let redirect_url = RedirectUrl::new(redirect_uri.to_owned()).map_err(|source| {
			UpstreamError::Unreachable(ConfigError::InvalidEndpoint { source }.into())
		})?;
		let slot = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(slot.clone());
		let outcome = self
			.oauth_client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.set_redirect_uri(Cow::Owned(redirect_url))
			.request_async(&instrumented)
			.await;

		self.relay(GrantType::AuthorizationCode, outcome.map(|_| ()), slot)
	}

	/// Exchanges a refresh token.
	pub async fn refresh_token(&self, refresh_token: &str) -> Result<UpstreamTokens, UpstreamError> {
		let refresh_secret = RefreshToken::new(refresh_token.to_owned());
		let slot = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(slot.clone());
		let outcome = self
			.oauth_client
			.exchange_refresh_token(&refresh_secret)
			.request_async(&instrumented)
			.await;

		self.relay(GrantType::RefreshToken, outcome.map(|_| ()), slot)
	}

	fn relay(
		&self,
		grant: GrantType,
		outcome: Result<(), BasicRequestTokenError<HttpClientError<C::TransportError>>>,
		slot: ResponseMetadataSlot,
	) -> Result<UpstreamTokens, UpstreamError> {
		let meta = slot.take();
		let status = meta.as_ref().and_then(|m| m.status);
		let body = meta.as_ref().and_then(|m| m.body.clone()).unwrap_or_default();

		match outcome {
			Ok(()) => Ok(UpstreamTokens { status: status.unwrap_or(200), body }),
			Err(RequestTokenError::Request(err)) => Err(UpstreamError::Unreachable(
				self.error_mapper.map_transport_error("token endpoint", meta.as_ref(), err),
			)),
			Err(err) => match status {
				Some(status) if !(200..300).contains(&status) =>
					Err(UpstreamError::Rejected { status, body }),
				_ => Err(UpstreamError::Malformed { message: format!("{grant} response: {err}") }),
			},
		}
	}
}
#[cfg(feature = "reqwest")]
impl TokenEndpointClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Builds a client backed by a default reqwest transport.
	pub fn with_reqwest(
		token_url: &Url,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
	) -> Result<Self> {
		Self::new(
			token_url,
			client_id,
			client_secret,
			ReqwestHttpClient::default(),
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> Debug for TokenEndpointClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpointClient")
			.field("token_url", &self.oauth_client.token_uri().as_str())
			.field("client_secret", &"<redacted>")
			.finish_non_exhaustive()
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;

	#[test]
	fn builds_secret_holding_client_without_leaking_secret() {
		let url = Url::parse("https://api.freeagent.com/v2/token_endpoint")
			.expect("Token endpoint fixture should parse.");
		let client = TokenEndpointClient::with_reqwest(&url, "client-id", "super-secret")
			.expect("Token endpoint client should build.");
		let printed = format!("{client:?}");

		assert!(printed.contains("token_endpoint"));
		assert!(!printed.contains("super-secret"));
	}

	#[test]
	fn grant_types_render_rfc_values() {
		assert_eq!(GrantType::AuthorizationCode.to_string(), "authorization_code");
		assert_eq!(GrantType::RefreshToken.as_str(), "refresh_token");
	}
}
