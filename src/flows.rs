//! Token flows and the [`Connection`] facade that wires them together.
//!
//! The facade owns one [`TokenLifecycleManager`]; construct it once per provider account and
//! share it, never rebuild it per request, or the single-flight refresh guard is lost.

pub mod authorize;
pub mod exchange;
pub mod lifecycle;
pub mod request;

pub use authorize::*;
pub use exchange::*;
pub use lifecycle::*;
pub use request::*;

// self
use crate::{
	_prelude::*,
	api::AccountingApi,
	auth::TokenRecord,
	clock::{Clock, SystemClock},
	http::HttpTransport,
	oauth::TransportErrorMapper,
	provider::ProviderDescriptor,
	redirect::RedirectListener,
	store::{DEFAULT_NAMESPACE, KeyValueStore, TokenStore},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Connection specialized for the crate's default reqwest transport stack.
pub type ReqwestConnection = Connection<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// UI-facing entry point: authenticate, read tokens, call the API, log out.
pub struct Connection<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	descriptor: Arc<ProviderDescriptor>,
	acquirer: AuthorizationCodeAcquirer,
	lifecycle: Arc<TokenLifecycleManager<C, M>>,
	requests: Arc<AuthenticatedRequestClient<C, M>>,
}
impl<C, M> Connection<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts a builder for a connection that reuses the caller-provided transport + mapper pair.
	pub fn builder(
		store: Arc<dyn KeyValueStore>,
		descriptor: ProviderDescriptor,
		listener: RedirectListener,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> ConnectionBuilder<C, M> {
		ConnectionBuilder {
			store,
			descriptor,
			listener,
			http_client: http_client.into(),
			mapper: mapper.into(),
			clock: Arc::new(SystemClock),
			authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
			refresh_leeway: Duration::ZERO,
			namespace: DEFAULT_NAMESPACE.into(),
		}
	}

	/// Creates a connection with default tuning over the caller-provided transport.
	pub fn with_http_client(
		store: Arc<dyn KeyValueStore>,
		descriptor: ProviderDescriptor,
		listener: RedirectListener,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self::builder(store, descriptor, listener, http_client, mapper).build()
	}

	/// Runs the interactive flow, exchanges the code, and installs the resulting record.
	///
	/// On success the record is persisted and the connection flag is set.
	pub async fn authenticate(&self) -> Result<TokenRecord> {
		let grant = self.acquirer.acquire().await?;
		let response =
			self.lifecycle.exchanger().exchange_code(&grant.code, &grant.redirect_uri).await?;

		self.lifecycle.install(&response).await
	}

	/// See [`TokenLifecycleManager::get_tokens`].
	pub async fn get_tokens(&self) -> Result<TokenRecord> {
		self.lifecycle.get_tokens().await
	}

	/// See [`TokenLifecycleManager::refresh`].
	pub async fn refresh(&self) -> Result<TokenRecord> {
		self.lifecycle.refresh().await
	}

	/// See [`AuthenticatedRequestClient::request`].
	pub async fn api_request(&self, endpoint: &str, options: &RequestOptions) -> Result<ApiResponse> {
		self.requests.request(endpoint, options).await
	}

	/// Destroys the local record and clears the connection flag.
	pub async fn logout(&self) -> Result<()> {
		self.lifecycle.logout().await?;

		#[cfg(feature = "tracing")]
		tracing::info!(provider = %self.descriptor.id, "Disconnected.");

		Ok(())
	}

	/// Reads the persisted connection flag.
	pub async fn is_connected(&self) -> Result<bool> {
		self.lifecycle.is_connected().await
	}

	/// Descriptor this connection authenticates against.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Lifecycle manager shared by the facade and its request client.
	pub fn lifecycle(&self) -> &Arc<TokenLifecycleManager<C, M>> {
		&self.lifecycle
	}

	/// Shared request client.
	pub fn request_client(&self) -> Arc<AuthenticatedRequestClient<C, M>> {
		self.requests.clone()
	}

	/// Typed FreeAgent helpers over this connection.
	pub fn accounting_api(&self) -> AccountingApi<C, M> {
		AccountingApi::new(self.requests.clone())
	}

	/// Shared refresh counters.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.lifecycle.refresh_metrics()
	}
}
#[cfg(feature = "reqwest")]
impl Connection<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a connection that provisions its own reqwest-backed transport.
	pub fn new(
		store: Arc<dyn KeyValueStore>,
		descriptor: ProviderDescriptor,
		listener: RedirectListener,
	) -> Self {
		Self::with_http_client(
			store,
			descriptor,
			listener,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for Connection<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Connection")
			.field("descriptor", &self.descriptor)
			.field("acquirer", &self.acquirer)
			.field("lifecycle", &self.lifecycle)
			.finish()
	}
}

/// Tuning for [`Connection`].
pub struct ConnectionBuilder<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	store: Arc<dyn KeyValueStore>,
	descriptor: ProviderDescriptor,
	listener: RedirectListener,
	http_client: Arc<C>,
	mapper: Arc<M>,
	clock: Arc<dyn Clock>,
	authorization_timeout: Duration,
	refresh_leeway: Duration,
	namespace: String,
}
impl<C, M> ConnectionBuilder<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Replaces the system clock.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Bounded wait for the authorization redirect (default five minutes).
	pub fn authorization_timeout(mut self, timeout: Duration) -> Self {
		self.authorization_timeout = timeout;

		self
	}

	/// Margin before `expires_at` at which a record already counts as expired (default zero).
	pub fn refresh_leeway(mut self, leeway: Duration) -> Self {
		self.refresh_leeway = leeway;

		self
	}

	/// Store namespace for the token record and connection flag (default `freeagent`).
	pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();

		self
	}

	/// Assembles the connection.
	pub fn build(self) -> Connection<C, M> {
		let descriptor = Arc::new(self.descriptor);
		let store = TokenStore::with_namespace(self.store, &self.namespace);
		let exchanger =
			TokenExchanger::new(descriptor.clone(), self.http_client.clone(), self.mapper.clone());
		let lifecycle = Arc::new(TokenLifecycleManager::new(
			store,
			exchanger,
			self.clock,
			self.refresh_leeway,
		));
		let requests = Arc::new(AuthenticatedRequestClient::new(
			descriptor.clone(),
			lifecycle.clone(),
			self.http_client,
			self.mapper,
		));
		let acquirer = AuthorizationCodeAcquirer::new(descriptor.clone(), self.listener)
			.with_timeout(self.authorization_timeout);

		Connection { descriptor, acquirer, lifecycle, requests }
	}
}
impl<C, M> Debug for ConnectionBuilder<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionBuilder")
			.field("descriptor", &self.descriptor)
			.field("authorization_timeout", &self.authorization_timeout)
			.field("refresh_leeway", &self.refresh_leeway)
			.field("namespace", &self.namespace)
			.finish_non_exhaustive()
	}
}
