//! OAuth token lifecycle for time-tracking clients that push billable timeslips into a hosted
//! accounting API.
//!
//! The crate covers the authenticated half of the client: a redirect-based authorization flow
//! (platform callback or loopback listener), a trusted intermediary that alone holds the client
//! secret, a persisted token record with single-flight refresh, and an authenticated request
//! client that retries exactly once after a `401`.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod api;
pub mod auth;
pub mod clock;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod proxy;
pub mod redirect;
pub mod store;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests.

	pub use crate::_prelude::*;

	// self
	use crate::{
		clock::{Clock, ManualClock},
		flows::Connection,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		provider::ProviderDescriptor,
		redirect::RedirectListener,
		store::{KeyValueStore, MemoryStore},
	};

	/// Connection type alias used by reqwest-backed integration tests.
	pub type ReqwestTestConnection = Connection<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds the plain-HTTP reqwest client used against `httpmock` and loopback listeners.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.build()
			.expect("Failed to build Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs a [`Connection`] backed by an in-memory store, a manual clock pinned to the
	/// current instant, and the reqwest transport used across integration tests.
	pub fn build_reqwest_test_connection(
		descriptor: ProviderDescriptor,
		listener: RedirectListener,
	) -> (ReqwestTestConnection, Arc<MemoryStore>, Arc<ManualClock>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn KeyValueStore> = store_backend.clone();
		let clock_backend = Arc::new(ManualClock::starting_now());
		let clock: Arc<dyn Clock> = clock_backend.clone();
		let connection = ReqwestTestConnection::builder(
			store,
			descriptor,
			listener,
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.clock(clock)
		.build();

		(connection, store_backend, clock_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(feature = "proxy-bin")] use {clap as _, tracing_subscriber as _};
#[cfg(test)] use {color_eyre as _, httpmock as _};
