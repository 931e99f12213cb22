//! Token lifecycle ownership with single-flight refresh.
//!
//! [`TokenLifecycleManager`] is the only component that reads or replaces the current
//! [`TokenRecord`]. Every write goes to the [`TokenStore`] first and only then becomes visible
//! through the in-memory cache, so no caller ever observes a token that has not been persisted.
//! Refreshes run behind a per-manager gate: a caller that waited on the gate while another caller
//! refreshed returns that flight's result instead of spending the refresh token a second time.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{ProviderId, TokenRecord, TokenResponse},
	clock::Clock,
	flows::TokenExchanger,
	http::HttpTransport,
	oauth::TransportErrorMapper,
	obs::{self, RefreshEvent},
	store::TokenStore,
};

/// Refresh flight counters for one provider, mirrored to `timeslip_auth_refresh_total` when the
/// `metrics` feature is enabled.
#[derive(Debug)]
pub struct RefreshMetrics {
	provider: ProviderId,
	attempts: AtomicU64,
	successes: AtomicU64,
	failures: AtomicU64,
	reuses: AtomicU64,
}
impl RefreshMetrics {
	fn new(provider: ProviderId) -> Self {
		Self {
			provider,
			attempts: AtomicU64::new(0),
			successes: AtomicU64::new(0),
			failures: AtomicU64::new(0),
			reuses: AtomicU64::new(0),
		}
	}

	/// Provider the counters belong to.
	pub fn provider(&self) -> &ProviderId {
		&self.provider
	}

	/// Refresh exchanges sent to the intermediary.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Refresh exchanges that produced a persisted record.
	pub fn successes(&self) -> u64 {
		self.successes.load(Ordering::Relaxed)
	}

	/// Refresh exchanges that failed, including persistence failures.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	/// Callers served by another caller's flight instead of exchanging again.
	pub fn reuses(&self) -> u64 {
		self.reuses.load(Ordering::Relaxed)
	}

	fn record(&self, event: RefreshEvent) {
		let counter = match event {
			RefreshEvent::Attempt => &self.attempts,
			RefreshEvent::Success => &self.successes,
			RefreshEvent::Failure => &self.failures,
			RefreshEvent::Reuse => &self.reuses,
		};

		counter.fetch_add(1, Ordering::Relaxed);
		obs::record_refresh_event(&self.provider, event);
	}
}

/// Authoritative owner of the current token record.
pub struct TokenLifecycleManager<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	store: TokenStore,
	exchanger: TokenExchanger<C, M>,
	clock: Arc<dyn Clock>,
	refresh_leeway: Duration,
	cache: RwLock<Option<TokenRecord>>,
	refresh_gate: AsyncMutex<()>,
	metrics: Arc<RefreshMetrics>,
}
impl<C, M> TokenLifecycleManager<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a manager over `store` that refreshes through `exchanger`.
	///
	/// `refresh_leeway` treats a record as expired that long before its `expires_at`; zero keeps
	/// the plain `now >= expires_at` rule.
	pub fn new(
		store: TokenStore,
		exchanger: TokenExchanger<C, M>,
		clock: Arc<dyn Clock>,
		refresh_leeway: Duration,
	) -> Self {
		let metrics = Arc::new(RefreshMetrics::new(exchanger.descriptor().id.clone()));

		Self {
			store,
			exchanger,
			clock,
			refresh_leeway: if refresh_leeway.is_negative() { Duration::ZERO } else { refresh_leeway },
			cache: RwLock::new(None),
			refresh_gate: AsyncMutex::new(()),
			metrics,
		}
	}

	/// Exchanger used for refreshes.
	pub fn exchanger(&self) -> &TokenExchanger<C, M> {
		&self.exchanger
	}

	/// Shared refresh counters.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	/// Record currently held in memory, without consulting the store.
	pub fn cached(&self) -> Option<TokenRecord> {
		self.cache.read().clone()
	}

	/// Installs the record derived from a successful code exchange.
	///
	/// The record is persisted, then the connection flag is set, then the cache is updated.
	pub async fn install(&self, response: &TokenResponse) -> Result<TokenRecord> {
		let _flight = self.refresh_gate.lock().await;
		let record = TokenRecord::from_response(response, self.clock.now())
			.map_err(|e| Error::malformed_token_response(e.to_string()))?;

		self.store.save_tokens(&record).await?;
		self.store.set_connected(true).await?;
		*self.cache.write() = Some(record.clone());

		#[cfg(feature = "tracing")]
		tracing::debug!(expires_at = %record.expires_at, "Token record installed.");

		Ok(record)
	}

	/// Returns a usable record, refreshing an expired one first.
	///
	/// Fails with [`Error::NotAuthenticated`] when nothing was ever installed (or the record was
	/// destroyed) and with [`Error::ReauthenticationRequired`] when the refresh is rejected.
	pub async fn get_tokens(&self) -> Result<TokenRecord> {
		if let Some(record) = self.cached()
			&& self.is_fresh(&record)
		{
			return Ok(record);
		}

		let Some(record) = self.store.load_tokens().await? else {
			*self.cache.write() = None;

			return Err(Error::NotAuthenticated);
		};

		if self.is_fresh(&record) {
			*self.cache.write() = Some(record.clone());

			return Ok(record);
		}

		self.refresh_from(&record).await
	}

	/// Forces a refresh of the current record.
	///
	/// Fails with [`Error::NoRefreshToken`] when no record exists at all.
	pub async fn refresh(&self) -> Result<TokenRecord> {
		let current = match self.cached() {
			Some(record) => record,
			None => self.store.load_tokens().await?.ok_or(Error::NoRefreshToken)?,
		};

		if current.refresh_token.is_empty() {
			return Err(Error::NoRefreshToken);
		}

		self.refresh_from(&current).await
	}

	/// Refreshes on behalf of a caller that found `stale` unusable (expired, or rejected with
	/// `401`).
	///
	/// If another flight replaced `stale` while this caller waited on the gate, the replacement is
	/// returned without a second exchange.
	pub async fn refresh_from(&self, stale: &TokenRecord) -> Result<TokenRecord> {
		let _flight = self.refresh_gate.lock().await;
		let current = match self.cached() {
			Some(record) => Some(record),
			None => self.store.load_tokens().await?,
		};
		let Some(current) = current else {
			return Err(Error::ReauthenticationRequired {
				reason: "the session was cleared while waiting for a refresh".into(),
			});
		};

		if current.access_token != stale.access_token && self.is_fresh(&current) {
			self.metrics.record(RefreshEvent::Reuse);

			return Ok(current);
		}

		self.metrics.record(RefreshEvent::Attempt);

		let exchanged =
			self.exchanger.exchange_refresh_token(&current.refresh_token).await.and_then(|response| {
				TokenRecord::from_response(&response, self.clock.now())
					.map_err(|e| Error::malformed_token_response(e.to_string()))
			});

		match exchanged {
			Ok(record) => {
				self.store
					.save_tokens(&record)
					.await
					.inspect_err(|_| self.metrics.record(RefreshEvent::Failure))?;
				*self.cache.write() = Some(record.clone());
				self.metrics.record(RefreshEvent::Success);

				Ok(record)
			},
			Err(e @ (Error::RefreshExchangeFailed { .. } | Error::ExchangeFailed { .. })) => {
				self.metrics.record(RefreshEvent::Failure);

				#[cfg(feature = "tracing")]
				tracing::warn!(error = %e, "Refresh rejected; clearing local token state.");

				self.destroy().await?;

				Err(Error::ReauthenticationRequired { reason: e.to_string() })
			},
			Err(e) => {
				self.metrics.record(RefreshEvent::Failure);

				Err(e)
			},
		}
	}

	/// Destroys the record and the connection flag.
	pub async fn logout(&self) -> Result<()> {
		let _flight = self.refresh_gate.lock().await;

		self.destroy().await
	}

	/// Reads the persisted connection flag.
	pub async fn is_connected(&self) -> Result<bool> {
		Ok(self.store.is_connected().await?)
	}

	// A horizon past the representable range counts as stale.
	fn is_fresh(&self, record: &TokenRecord) -> bool {
		self.clock
			.now()
			.checked_add(self.refresh_leeway)
			.is_some_and(|horizon| record.is_valid_at(horizon))
	}

	async fn destroy(&self) -> Result<()> {
		*self.cache.write() = None;

		self.store.clear().await?;

		Ok(())
	}
}
impl<C, M> Debug for TokenLifecycleManager<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenLifecycleManager")
			.field("store", &self.store)
			.field("refresh_leeway", &self.refresh_leeway)
			.field("cached", &self.cache.read().as_ref().map(|r| r.expires_at))
			.finish_non_exhaustive()
	}
}
