//! Code and refresh-token exchanges through the trusted intermediary.
//!
//! The local application never holds the client secret. Both exchanges post JSON to the
//! intermediary, which performs the provider call and relays the token body verbatim.

// crates.io
use oauth2::http::{
	Method, Request,
	header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{TokenResponse, TokenSecret},
	error::ConfigError,
	http::{self, HttpTransport},
	oauth::TransportErrorMapper,
	obs::{Flow, FlowKind},
	provider::ProviderDescriptor,
};

#[derive(Serialize)]
struct CodeExchangeBody<'a> {
	code: &'a str,
	redirect_uri: &'a str,
}

#[derive(Serialize)]
struct RefreshExchangeBody<'a> {
	refresh_token: &'a str,
}

/// Client half of the intermediary contract.
pub struct TokenExchanger<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	descriptor: Arc<ProviderDescriptor>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> TokenExchanger<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an exchanger that posts to the descriptor's intermediary routes.
	pub fn new(
		descriptor: Arc<ProviderDescriptor>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self { descriptor, http_client: http_client.into(), error_mapper: error_mapper.into() }
	}

	/// Provider whose intermediary routes this exchanger targets.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// `POST /api/<provider>/token` with `{code, redirect_uri}`.
	///
	/// Fails with [`Error::ExchangeFailed`] on any non-success status or a malformed body.
	pub async fn exchange_code(&self, code: &str, redirect_uri: &Url) -> Result<TokenResponse> {
		Flow::new(FlowKind::CodeExchange, &self.descriptor.id, "exchange_code").observe(async {
			let body = CodeExchangeBody { code, redirect_uri: redirect_uri.as_str() };

			self.post(self.descriptor.exchange_endpoint(), &body, |status, detail| {
				Error::ExchangeFailed { status, detail }
			})
			.await
		})
		.await
	}

	/// `POST /api/<provider>/refresh` with `{refresh_token}`.
	///
	/// Fails with [`Error::RefreshExchangeFailed`] on a non-success status and with
	/// [`Error::ExchangeFailed`] on a malformed body.
	pub async fn exchange_refresh_token(&self, refresh_token: &TokenSecret) -> Result<TokenResponse> {
		Flow::new(FlowKind::Refresh, &self.descriptor.id, "exchange_refresh_token").observe(async {
			let body = RefreshExchangeBody { refresh_token: refresh_token.expose() };

			self.post(self.descriptor.refresh_endpoint(), &body, |status, detail| {
				Error::RefreshExchangeFailed { status, detail }
			})
			.await
		})
		.await
	}

	async fn post<B>(
		&self,
		endpoint: Url,
		body: &B,
		rejected: fn(Option<u16>, String) -> Error,
	) -> Result<TokenResponse>
	where
		B: Serialize,
	{
		let payload = serde_json::to_vec(body).map_err(ConfigError::RequestBody)?;
		let request = Request::builder()
			.method(Method::POST)
			.uri(endpoint.as_str())
			.header(CONTENT_TYPE, "application/json")
			.header(ACCEPT, "application/json")
			.body(payload)
			.map_err(ConfigError::from)?;
		let response = http::dispatch(
			self.http_client.as_ref(),
			self.error_mapper.as_ref(),
			"intermediary",
			request,
		)
		.await?;
		let status = response.status();

		if !status.is_success() {
			#[cfg(feature = "tracing")]
			tracing::debug!(%endpoint, status = status.as_u16(), "Intermediary rejected the exchange.");

			return Err(rejected(
				Some(status.as_u16()),
				describe_error_payload(status.as_u16(), response.body()),
			));
		}

		TokenResponse::from_json_slice(response.body())
			.map_err(|e| Error::malformed_token_response(e.to_string()))
	}
}
impl<C, M> Debug for TokenExchanger<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenExchanger")
			.field("exchange_endpoint", &self.descriptor.exchange_endpoint().as_str())
			.field("refresh_endpoint", &self.descriptor.refresh_endpoint().as_str())
			.finish()
	}
}

/// Renders an intermediary error payload for diagnostics.
///
/// `{error, details}` bodies become `"<error>: <details>"`; other bodies are used as text.
pub(crate) fn describe_error_payload(status: u16, body: &[u8]) -> String {
	if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
		let error = map.get("error").map(render_value);
		let details = map.get("details").or_else(|| map.get("error_description")).map(render_value);

		match (error, details) {
			(Some(error), Some(details)) => return format!("{error}: {details}"),
			(Some(error), None) => return error,
			(None, Some(details)) => return details,
			(None, None) => {},
		}
	}

	let text = String::from_utf8_lossy(body);
	let text = text.trim();

	if text.is_empty() { format!("HTTP {status}") } else { text.to_owned() }
}

fn render_value(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn describes_structured_and_plain_payloads() {
		assert_eq!(
			describe_error_payload(
				400,
				br#"{"error":"Token refresh failed","details":{"error":"invalid_grant"}}"#
			),
			r#"Token refresh failed: {"error":"invalid_grant"}"#
		);
		assert_eq!(
			describe_error_payload(400, br#"{"error":"invalid_grant"}"#),
			"invalid_grant"
		);
		assert_eq!(describe_error_payload(502, b"Bad Gateway\n"), "Bad Gateway");
		assert_eq!(describe_error_payload(500, b""), "HTTP 500");
	}
}
