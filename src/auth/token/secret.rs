//! Redacting wrapper for bearer and refresh credentials.

// self
use crate::_prelude::*;

/// Opaque credential that never prints its value.
///
/// Serialization is transparent so persisted records keep the plain `access_token` /
/// `refresh_token` string layout.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a credential string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw credential. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the credential is the empty string.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Formats the credential as an `Authorization` header value.
	pub fn bearer_header(&self) -> String {
		format!("Bearer {}", self.0)
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenSecret(<redacted>)")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatters_redact_and_serde_stays_plain() {
		let secret = TokenSecret::new("AT1");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert_eq!(secret.bearer_header(), "Bearer AT1");
		assert_eq!(serde_json::to_string(&secret).expect("Secret should serialize."), "\"AT1\"");
	}
}
