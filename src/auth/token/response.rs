//! Token endpoint payloads relayed by the intermediary.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Longest access-token lifetime accepted from a token endpoint (ten years).
pub const MAX_EXPIRES_IN: u64 = 10 * 365 * 24 * 60 * 60;

/// Validated token response shared by the code exchange and the refresh exchange.
///
/// All three of `access_token`, `refresh_token`, and `expires_in` are required; a nominally
/// successful response missing any of them is rejected rather than tolerated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
	/// Bearer credential.
	pub access_token: TokenSecret,
	/// Long-lived credential used only to mint new access tokens.
	pub refresh_token: TokenSecret,
	/// Lifetime of the access token in seconds, relative to receipt.
	pub expires_in: u64,
	/// Token type reported by the provider (normally `Bearer`).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token_type: Option<String>,
}
impl TokenResponse {
	/// Builds a response from already-validated parts.
	pub fn new(
		access_token: impl Into<String>,
		refresh_token: impl Into<String>,
		expires_in: u64,
	) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
			expires_in,
			token_type: Some("Bearer".into()),
		}
	}

	/// Lifetime as a [`Duration`].
	pub fn lifetime(&self) -> Duration {
		Duration::seconds(i64::try_from(self.expires_in).unwrap_or(i64::MAX))
	}

	/// Parses and validates a JSON body.
	pub fn from_json_slice(bytes: &[u8]) -> Result<Self, TokenResponseError> {
		let de = &mut serde_json::Deserializer::from_slice(bytes);
		let raw: RawTokenResponse = serde_path_to_error::deserialize(de).map_err(|e| {
			TokenResponseError::Parse { path: e.path().to_string(), message: e.inner().to_string() }
		})?;

		raw.validate()
	}
}

/// Reasons a token response body is rejected.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenResponseError {
	/// Body was not JSON of the expected shape.
	#[error("Token response could not be parsed at `{path}`: {message}")]
	Parse {
		/// JSON path of the failure (`.` for the document root).
		path: String,
		/// Parser message.
		message: String,
	},
	/// A required field was absent or null.
	#[error("Token response is missing `{field}`")]
	MissingField {
		/// Missing field name.
		field: &'static str,
	},
	/// A required credential was the empty string.
	#[error("Token response field `{field}` is empty")]
	EmptyField {
		/// Empty field name.
		field: &'static str,
	},
	/// `expires_in` was zero or negative.
	#[error("Token response expires_in must be positive, got {value}")]
	NonPositiveExpiresIn {
		/// Value received.
		value: i64,
	},
	/// `expires_in` exceeds [`MAX_EXPIRES_IN`] or places the expiry past the representable range.
	#[error("Token response expires_in is out of range, got {value}")]
	ExpiresInOutOfRange {
		/// Value received.
		value: u64,
	},
}

#[derive(Deserialize)]
struct RawTokenResponse {
	access_token: Option<String>,
	refresh_token: Option<String>,
	expires_in: Option<i64>,
	token_type: Option<String>,
}
impl RawTokenResponse {
	fn validate(self) -> Result<TokenResponse, TokenResponseError> {
		let access_token = required("access_token", self.access_token)?;
		let refresh_token = required("refresh_token", self.refresh_token)?;
		let expires_in =
			self.expires_in.ok_or(TokenResponseError::MissingField { field: "expires_in" })?;
		let expires_in = u64::try_from(expires_in)
			.ok()
			.filter(|secs| *secs > 0)
			.ok_or(TokenResponseError::NonPositiveExpiresIn { value: expires_in })?;

		if expires_in > MAX_EXPIRES_IN {
			return Err(TokenResponseError::ExpiresInOutOfRange { value: expires_in });
		}

		Ok(TokenResponse {
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
			expires_in,
			token_type: self.token_type,
		})
	}
}

fn required(field: &'static str, value: Option<String>) -> Result<String, TokenResponseError> {
	match value {
		Some(v) if v.is_empty() => Err(TokenResponseError::EmptyField { field }),
		Some(v) => Ok(v),
		None => Err(TokenResponseError::MissingField { field }),
	}
}
