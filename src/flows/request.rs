//! Authenticated calls to the accounting API with a single refresh-and-retry on `401`.

// crates.io
use oauth2::http::{
	HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode,
	header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	error::ConfigError,
	flows::TokenLifecycleManager,
	http::{self, HttpTransport},
	oauth::TransportErrorMapper,
	obs::{Flow, FlowKind},
	provider::ProviderDescriptor,
};

const JSON: &str = "application/json";

/// Method, headers, and body of an API call.
///
/// `Accept` and `Content-Type` default to JSON; caller headers with the same name replace the
/// defaults. `Authorization` is always owned by the client.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
	/// HTTP method.
	pub method: Method,
	/// Extra headers, applied after the defaults.
	pub headers: Vec<(String, String)>,
	/// Raw request body.
	pub body: Option<Vec<u8>>,
}
impl RequestOptions {
	/// `GET` without a body.
	pub fn get() -> Self {
		Self::default()
	}

	/// `POST` with a raw body.
	pub fn post(body: impl Into<Vec<u8>>) -> Self {
		Self { method: Method::POST, headers: Vec::new(), body: Some(body.into()) }
	}

	/// Any method with a JSON-serialized body.
	pub fn json<T>(method: Method, payload: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let body = serde_json::to_vec(payload).map_err(ConfigError::RequestBody)?;

		Ok(Self { method, headers: Vec::new(), body: Some(body) })
	}

	/// Appends a header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	fn build(&self, url: &Url, token: &TokenRecord) -> Result<Request<Vec<u8>>> {
		let mut request = Request::builder()
			.method(self.method.clone())
			.uri(url.as_str())
			.body(self.body.clone().unwrap_or_default())
			.map_err(ConfigError::from)?;
		let headers = request.headers_mut();

		headers.insert(ACCEPT, HeaderValue::from_static(JSON));
		headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));

		for (name, value) in &self.headers {
			let name = HeaderName::try_from(name.as_str())
				.map_err(|e| ConfigError::HttpRequest(e.into()))?;
			let value = HeaderValue::try_from(value.as_str())
				.map_err(|e| ConfigError::HttpRequest(e.into()))?;

			headers.insert(name, value);
		}

		let mut bearer = HeaderValue::try_from(token.access_token.bearer_header())
			.map_err(|e| ConfigError::HttpRequest(e.into()))?;

		bearer.set_sensitive(true);
		headers.insert(AUTHORIZATION, bearer);

		Ok(request)
	}
}

/// API response handed back uninterpreted, whatever its status.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// `true` for `2xx`.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Body as lossy UTF-8.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Deserializes the body as JSON.
	pub fn json<T>(&self) -> Result<T, serde_json::Error>
	where
		T: for<'de> Deserialize<'de>,
	{
		serde_json::from_slice(&self.body)
	}
}

/// Issues bearer-authenticated calls through the lifecycle manager.
pub struct AuthenticatedRequestClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	descriptor: Arc<ProviderDescriptor>,
	lifecycle: Arc<TokenLifecycleManager<C, M>>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> AuthenticatedRequestClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client sharing `lifecycle` with the rest of the connection.
	pub fn new(
		descriptor: Arc<ProviderDescriptor>,
		lifecycle: Arc<TokenLifecycleManager<C, M>>,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Self {
		Self { descriptor, lifecycle, http_client, error_mapper }
	}

	/// Sends `options` to `endpoint` (a path relative to the API base, or an absolute URL under
	/// it).
	///
	/// A `401` triggers one refresh and one retry; a second `401` is returned as is. Every other
	/// status is returned unmodified.
	pub async fn request(&self, endpoint: &str, options: &RequestOptions) -> Result<ApiResponse> {
		Flow::new(FlowKind::ApiRequest, &self.descriptor.id, "request").observe(async {
			let url = self.descriptor.resolve_api_url(endpoint)?;
			let mut token = self.lifecycle.get_tokens().await?;
			let mut refreshed = false;

			loop {
				let response = http::dispatch(
					self.http_client.as_ref(),
					self.error_mapper.as_ref(),
					"accounting api",
					options.build(&url, &token)?,
				)
				.await?;

				if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
					#[cfg(feature = "tracing")]
					tracing::debug!(%url, "Access token rejected; refreshing once.");

					token = self.lifecycle.refresh_from(&token).await?;
					refreshed = true;

					continue;
				}

				let (parts, body) = response.into_parts();

				return Ok(ApiResponse { status: parts.status, headers: parts.headers, body });
			}
		})
		.await
	}
}
impl<C, M> Debug for AuthenticatedRequestClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticatedRequestClient")
			.field("api_base", &self.descriptor.endpoints.api_base.as_str())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn record() -> TokenRecord {
		TokenRecord::builder()
			.access_token("AT1")
			.refresh_token("RT1")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token record fixture should build.")
	}

	#[test]
	fn defaults_are_json_and_caller_headers_win() {
		let url = Url::parse("https://api.example.com/v2/timeslips").expect("URL should parse.");
		let request = RequestOptions::get()
			.header("Accept", "text/csv")
			.header("X-Request-Id", "42")
			.build(&url, &record())
			.expect("Request should build.");

		assert_eq!(request.method(), Method::GET);
		assert_eq!(request.headers()[ACCEPT], "text/csv");
		assert_eq!(request.headers()[CONTENT_TYPE], JSON);
		assert_eq!(request.headers()["x-request-id"], "42");
		assert_eq!(request.headers()[AUTHORIZATION], "Bearer AT1");
		assert!(request.headers()[AUTHORIZATION].is_sensitive());
	}

	#[test]
	fn caller_cannot_replace_the_bearer() {
		let url = Url::parse("https://api.example.com/v2/users/me").expect("URL should parse.");
		let request = RequestOptions::get()
			.header("Authorization", "Bearer forged")
			.build(&url, &record())
			.expect("Request should build.");

		assert_eq!(request.headers()[AUTHORIZATION], "Bearer AT1");
	}

	#[test]
	fn json_options_serialize_the_payload() {
		let options = RequestOptions::json(Method::POST, &serde_json::json!({ "timeslip": { "hours": "1.5" } }))
			.expect("Payload should serialize.");

		assert_eq!(options.method, Method::POST);
		assert_eq!(options.body.as_deref(), Some(&br#"{"timeslip":{"hours":"1.5"}}"#[..]));
	}

	#[test]
	fn invalid_header_names_are_config_errors() {
		let url = Url::parse("https://api.example.com/v2/users/me").expect("URL should parse.");
		let err = RequestOptions::get()
			.header("bad header", "x")
			.build(&url, &record())
			.expect_err("Invalid header names must be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::HttpRequest(_))));
	}
}
