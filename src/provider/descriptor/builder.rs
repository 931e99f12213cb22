// std
use std::net::IpAddr;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, IdentifierError, ProviderId},
	provider::{ProviderDescriptor, ProviderEndpoints},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ProviderDescriptorError {
	/// A preset identifier failed validation.
	#[error(transparent)]
	Identifier(IdentifierError),
	/// A preset endpoint failed to parse.
	#[error("The {endpoint} endpoint is not a valid URL.")]
	InvalidUrl {
		/// Which endpoint failed to parse.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Authorization endpoint is required for the interactive flow.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// API base is required for authenticated requests.
	#[error("Missing API base endpoint.")]
	MissingApiBase,
	/// Intermediary base is required for every exchange.
	#[error("Missing intermediary endpoint.")]
	MissingIntermediary,
	/// Endpoints must use HTTPS unless they point at the local machine.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Endpoints must be hierarchical so paths can be appended.
	#[error("The {endpoint} endpoint cannot carry a path: {url}.")]
	OpaqueEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Scope strings must not contain control characters.
	#[error("Scope contains the control character {found:?}.")]
	InvalidScope {
		/// Offending character.
		found: char,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Identifier for the descriptor being constructed.
	pub id: ProviderId,
	/// Public client identifier.
	pub client_id: ClientId,
	/// Requested scope; defaults to empty.
	pub scope: String,
	/// Authorization page.
	pub authorization_endpoint: Option<Url>,
	/// API root.
	pub api_base: Option<Url>,
	/// Intermediary root.
	pub intermediary: Option<Url>,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifiers.
	pub fn new(id: ProviderId, client_id: ClientId) -> Self {
		Self {
			id,
			client_id,
			scope: String::new(),
			authorization_endpoint: None,
			api_base: None,
			intermediary: None,
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the API base.
	pub fn api_base(mut self, url: Url) -> Self {
		self.api_base = Some(url);

		self
	}

	/// Sets the intermediary base.
	pub fn intermediary(mut self, url: Url) -> Self {
		self.intermediary = Some(url);

		self
	}

	/// Sets the requested scope.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = scope.into();

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let api_base = self.api_base.ok_or(ProviderDescriptorError::MissingApiBase)?;
		let intermediary = self.intermediary.ok_or(ProviderDescriptorError::MissingIntermediary)?;
		let descriptor = ProviderDescriptor {
			id: self.id,
			client_id: self.client_id,
			scope: self.scope,
			endpoints: ProviderEndpoints { authorization, api_base, intermediary },
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("api", &self.endpoints.api_base)?;
		validate_endpoint("intermediary", &self.endpoints.intermediary)?;

		if let Some(found) = self.scope.chars().find(|c| c.is_control()) {
			return Err(ProviderDescriptorError::InvalidScope { found });
		}

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.cannot_be_a_base() {
		return Err(ProviderDescriptorError::OpaqueEndpoint { endpoint: name, url: url.to_string() });
	}

	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		_ =>
			Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() }),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
		Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptor::builder(
			ProviderId::new("freeagent").expect("Provider fixture should be valid."),
			ClientId::new("client").expect("Client fixture should be valid."),
		)
	}

	fn url(value: &str) -> Url {
		Url::parse(value).expect("URL fixture should parse.")
	}

	#[test]
	fn rejects_plain_http_outside_loopback() {
		let err = builder()
			.authorization_endpoint(url("http://accounts.example.com/approve"))
			.api_base(url("https://api.example.com/v2"))
			.intermediary(url("https://proxy.example.com"))
			.build()
			.expect_err("Plain HTTP authorization endpoint must be rejected.");

		assert!(matches!(
			err,
			ProviderDescriptorError::InsecureEndpoint { endpoint: "authorization", .. }
		));
	}

	#[test]
	fn accepts_loopback_http_for_local_intermediaries() {
		let descriptor = builder()
			.authorization_endpoint(url("https://accounts.example.com/approve"))
			.api_base(url("http://127.0.0.1:9000/v2"))
			.intermediary(url("http://localhost:3000"))
			.scope("read write")
			.build()
			.expect("Loopback endpoints should be accepted over HTTP.");

		assert_eq!(descriptor.scope, "read write");
	}

	#[test]
	fn requires_every_endpoint() {
		let err = builder()
			.authorization_endpoint(url("https://accounts.example.com/approve"))
			.intermediary(url("https://proxy.example.com"))
			.build()
			.expect_err("Descriptor without an API base must be rejected.");

		assert_eq!(err, ProviderDescriptorError::MissingApiBase);
	}
}
