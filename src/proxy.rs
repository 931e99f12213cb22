//! The trusted intermediary: the only process that ever holds the client secret.
//!
//! [`router`] exposes `POST /api/<provider>/token` and `POST /api/<provider>/refresh`, forwards
//! each to the provider's token endpoint through a [`TokenRelay`], and relays the provider's
//! success body byte for byte. `GET /health` answers liveness probes.

// crates.io
use axum::{
	Json, Router,
	body::Bytes,
	extract::{Path, State},
	http::{
		HeaderValue, Method, StatusCode,
		header::{ACCEPT, CONTENT_TYPE},
		request::Parts,
	},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, CorsLayer};
// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	http::HttpTransport,
	oauth::{TokenEndpointClient, TransportErrorMapper, UpstreamError, UpstreamTokens},
	obs::{self, Flow, FlowKind, FlowOutcome, FlowSpan},
};

/// Boxed future returned by [`TokenRelay`] implementations.
pub type RelayFuture<'a> =
	Pin<Box<dyn Future<Output = Result<UpstreamTokens, UpstreamError>> + 'a + Send>>;

/// Secret-holding side of the exchange, as seen by the HTTP handlers.
pub trait TokenRelay
where
	Self: Send + Sync,
{
	/// `grant_type=authorization_code`.
	fn exchange_code<'a>(&'a self, code: &'a str, redirect_uri: &'a str) -> RelayFuture<'a>;

	/// `grant_type=refresh_token`.
	fn refresh_token<'a>(&'a self, refresh_token: &'a str) -> RelayFuture<'a>;
}
impl<C, M> TokenRelay for TokenEndpointClient<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange_code<'a>(&'a self, code: &'a str, redirect_uri: &'a str) -> RelayFuture<'a> {
		Box::pin(TokenEndpointClient::exchange_code(self, code, redirect_uri))
	}

	fn refresh_token<'a>(&'a self, refresh_token: &'a str) -> RelayFuture<'a> {
		Box::pin(TokenEndpointClient::refresh_token(self, refresh_token))
	}
}

/// Shared handler state.
#[derive(Clone)]
pub struct ProxyState {
	provider: ProviderId,
	relay: Arc<dyn TokenRelay>,
}
impl ProxyState {
	/// Serves `provider` through `relay`; requests for any other provider slug get `404`.
	pub fn new(provider: ProviderId, relay: Arc<dyn TokenRelay>) -> Self {
		Self { provider, relay }
	}
}
impl Debug for ProxyState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProxyState").field("provider", &self.provider).finish_non_exhaustive()
	}
}

#[derive(Clone, Copy)]
enum Exchange {
	Code,
	Refresh,
}
impl Exchange {
	fn failure_label(self) -> &'static str {
		match self {
			Exchange::Code => "Token exchange failed",
			Exchange::Refresh => "Token refresh failed",
		}
	}

	fn stage(self) -> &'static str {
		match self {
			Exchange::Code => "relay_code",
			Exchange::Refresh => "relay_refresh",
		}
	}

	// A rejected refresh token is dead, while a rejected code only needs a new consent round.
	fn outcome(self, error: &UpstreamError) -> FlowOutcome {
		match (self, error) {
			(Exchange::Refresh, UpstreamError::Rejected { .. }) => FlowOutcome::Reconnect,
			(Exchange::Code, UpstreamError::Rejected { .. }) | (_, UpstreamError::Unreachable(_)) =>
				FlowOutcome::Retryable,
			(_, UpstreamError::Malformed { .. }) => FlowOutcome::Failure,
		}
	}
}

/// Builds the intermediary router with CORS for browser-extension and loopback origins.
pub fn router(state: ProxyState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/api/{provider}/token", post(exchange_code))
		.route("/api/{provider}/refresh", post(refresh_token))
		.fallback(not_found)
		.layer(cors())
		.with_state(state)
}

/// CORS policy admitting `chrome-extension://` origins and `http://localhost` / `127.0.0.1`.
pub fn cors() -> CorsLayer {
	CorsLayer::new()
		.allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _: &Parts| {
			origin.to_str().is_ok_and(is_allowed_origin)
		}))
		.allow_methods([Method::GET, Method::POST])
		.allow_headers([CONTENT_TYPE, ACCEPT])
		.allow_credentials(true)
}

fn is_allowed_origin(origin: &str) -> bool {
	if origin.starts_with("chrome-extension://") {
		return true;
	}

	let Some(rest) = origin.strip_prefix("http://") else {
		return false;
	};
	let host = match rest.rsplit_once(':') {
		Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
		_ => rest,
	};

	matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "OK", "message": "Token proxy is running" }))
}

async fn not_found() -> Response {
	error_response(StatusCode::NOT_FOUND, "Not found", Value::Null)
}

async fn exchange_code(
	State(state): State<ProxyState>,
	Path(provider): Path<String>,
	body: Bytes,
) -> Response {
	if provider.as_str() != &*state.provider {
		return unknown_provider(&provider);
	}

	let fields = match parse_body(&body) {
		Ok(fields) => fields,
		Err(response) => return response,
	};
	let (Some(code), Some(redirect_uri)) =
		(string_field(&fields, "code"), string_field(&fields, "redirect_uri"))
	else {
		return error_response(
			StatusCode::BAD_REQUEST,
			"Missing required parameters",
			"Both code and redirect_uri are required".into(),
		);
	};

	relay(&state.provider, Exchange::Code, state.relay.exchange_code(code, redirect_uri)).await
}

async fn refresh_token(
	State(state): State<ProxyState>,
	Path(provider): Path<String>,
	body: Bytes,
) -> Response {
	if provider.as_str() != &*state.provider {
		return unknown_provider(&provider);
	}

	let fields = match parse_body(&body) {
		Ok(fields) => fields,
		Err(response) => return response,
	};
	let Some(refresh_token) = string_field(&fields, "refresh_token") else {
		return error_response(
			StatusCode::BAD_REQUEST,
			"Missing refresh_token",
			"refresh_token is required".into(),
		);
	};

	relay(&state.provider, Exchange::Refresh, state.relay.refresh_token(refresh_token)).await
}

async fn relay(provider: &ProviderId, exchange: Exchange, upstream: RelayFuture<'_>) -> Response {
	let flow = Flow::new(FlowKind::Relay, provider, exchange.stage());
	let span = FlowSpan::new(&flow);

	obs::record_flow_outcome(&flow, FlowOutcome::Attempt);

	let outcome = span.instrument(upstream).await;
	let settled = match &outcome {
		Ok(_) => FlowOutcome::Success,
		Err(e) => exchange.outcome(e),
	};

	span.record_outcome(settled);
	obs::record_flow_outcome(&flow, settled);

	match outcome {
		Ok(tokens) => {
			#[cfg(feature = "tracing")]
			tracing::info!(stage = exchange.stage(), "Relayed token response.");

			let status = StatusCode::from_u16(tokens.status).unwrap_or(StatusCode::OK);

			(status, [(CONTENT_TYPE, HeaderValue::from_static("application/json"))], tokens.body)
				.into_response()
		},
		Err(UpstreamError::Rejected { status, body }) => {
			#[cfg(feature = "tracing")]
			tracing::warn!(stage = exchange.stage(), status, "Token endpoint rejected the exchange.");

			let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);

			error_response(status, exchange.failure_label(), upstream_details(&body))
		},
		Err(UpstreamError::Malformed { message }) => {
			#[cfg(feature = "tracing")]
			tracing::warn!(stage = exchange.stage(), %message, "Token endpoint answered garbage.");

			error_response(StatusCode::BAD_GATEWAY, exchange.failure_label(), message.into())
		},
		Err(UpstreamError::Unreachable(e)) => {
			#[cfg(feature = "tracing")]
			tracing::error!(stage = exchange.stage(), error = %e, "Token endpoint unreachable.");

			error_response(StatusCode::BAD_GATEWAY, "Upstream unreachable", e.to_string().into())
		},
	}
}

fn parse_body(body: &[u8]) -> Result<serde_json::Map<String, Value>, Response> {
	match serde_json::from_slice::<Value>(body) {
		Ok(Value::Object(fields)) => Ok(fields),
		Ok(_) | Err(_) if body.iter().all(u8::is_ascii_whitespace) => Ok(Default::default()),
		_ => Err(error_response(
			StatusCode::BAD_REQUEST,
			"Invalid request body",
			"Expected a JSON object".into(),
		)),
	}
}

fn string_field<'a>(fields: &'a serde_json::Map<String, Value>, name: &str) -> Option<&'a str> {
	fields.get(name).and_then(Value::as_str).filter(|value| !value.is_empty())
}

fn upstream_details(body: &[u8]) -> Value {
	serde_json::from_slice(body)
		.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn unknown_provider(provider: &str) -> Response {
	error_response(StatusCode::NOT_FOUND, "Unknown provider", provider.into())
}

fn error_response(status: StatusCode, error: &str, details: Value) -> Response {
	let body = if details.is_null() {
		json!({ "error": error })
	} else {
		json!({ "error": error, "details": details })
	};

	(status, Json(body)).into_response()
}
