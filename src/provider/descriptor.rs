//! Provider descriptor data structures and endpoint helpers shared by all flows.

/// Builder API for assembling provider descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::{
	_prelude::*,
	auth::{ClientId, ProviderId},
	error::ConfigError,
};

/// FreeAgent's interactive consent page.
pub const FREEAGENT_AUTHORIZATION_URL: &str = "https://api.freeagent.com/v2/approve_app";
/// FreeAgent's REST API root.
pub const FREEAGENT_API_BASE_URL: &str = "https://api.freeagent.com/v2";
/// Scope requested by the time tracker.
pub const FREEAGENT_SCOPE: &str = "read write";

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization page opened in the browsing context.
	pub authorization: Url,
	/// Root of the accounting API; relative request paths are appended to it.
	pub api_base: Url,
	/// Base URL of the trusted intermediary that holds the client secret.
	pub intermediary: Url,
}

/// Immutable provider descriptor consumed by flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Provider slug used in intermediary routes.
	pub id: ProviderId,
	/// Public client identifier embedded in the authorize URL.
	pub client_id: ClientId,
	/// Space-delimited scope string embedded in the authorize URL.
	pub scope: String,
	/// Endpoint definitions.
	pub endpoints: ProviderEndpoints,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier and client.
	pub fn builder(id: ProviderId, client_id: ClientId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id, client_id)
	}

	/// FreeAgent preset pointing at the given intermediary.
	pub fn freeagent(
		client_id: ClientId,
		intermediary: Url,
	) -> Result<Self, ProviderDescriptorError> {
		let id = ProviderId::new("freeagent").map_err(ProviderDescriptorError::Identifier)?;
		let authorization = Url::parse(FREEAGENT_AUTHORIZATION_URL)
			.map_err(|source| ProviderDescriptorError::InvalidUrl { endpoint: "authorization", source })?;
		let api_base = Url::parse(FREEAGENT_API_BASE_URL)
			.map_err(|source| ProviderDescriptorError::InvalidUrl { endpoint: "api", source })?;

		Self::builder(id, client_id)
			.authorization_endpoint(authorization)
			.api_base(api_base)
			.intermediary(intermediary)
			.scope(FREEAGENT_SCOPE)
			.build()
	}

	/// Intermediary route for authorization-code exchanges: `POST /api/<provider>/token`.
	pub fn exchange_endpoint(&self) -> Url {
		self.intermediary_route("token")
	}

	/// Intermediary route for refresh exchanges: `POST /api/<provider>/refresh`.
	pub fn refresh_endpoint(&self) -> Url {
		self.intermediary_route("refresh")
	}

	/// Resolves a caller-supplied endpoint against the API base.
	///
	/// Relative paths (`/timeslips`, `tasks?project=..`) are appended to the base. Either form is
	/// accepted only when the result shares the base's origin and path prefix, so the bearer token
	/// never leaves the accounting API.
	pub fn resolve_api_url(&self, endpoint: &str) -> Result<Url, ConfigError> {
		let base = &self.endpoints.api_base;
		let url = match Url::parse(endpoint) {
			Ok(absolute) => absolute,
			Err(_) => {
				let joined = format!(
					"{}/{}",
					base.as_str().trim_end_matches('/'),
					endpoint.trim_start_matches('/')
				);

				Url::parse(&joined).map_err(|source| ConfigError::InvalidEndpoint { source })?
			},
		};

		// Parsing normalizes dot segments, so `/../x` is checked after it escapes the base.
		if self.is_within_api(&url) {
			Ok(url)
		} else {
			Err(ConfigError::ForeignEndpoint { url: url.to_string() })
		}
	}

	fn is_within_api(&self, url: &Url) -> bool {
		let base = &self.endpoints.api_base;
		let base_path = base.path().trim_end_matches('/');

		url.origin() == base.origin()
			&& (url.path() == base_path || url.path().starts_with(&format!("{base_path}/")))
	}

	fn intermediary_route(&self, action: &str) -> Url {
		let mut url = self.endpoints.intermediary.clone();

		url.set_query(None);
		url.set_fragment(None);

		// Validation rejects cannot-be-a-base URLs, so segments are always available.
		if let Ok(mut segments) = url.path_segments_mut() {
			segments.pop_if_empty().extend(["api", self.id.as_ref(), action]);
		}

		url
	}
}
