//! Storage contracts: the externally supplied key/value store and the token adapter layered on it.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, auth::TokenRecord};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "freeagent";

/// Persisted key/value store supplied by the host application.
///
/// Implementations must provide atomic single-key reads and writes; `remove` deletes every listed
/// key in one operation.
pub trait KeyValueStore
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`, if any.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set<'a>(&'a self, key: &'a str, value: Value) -> StoreFuture<'a, ()>;

	/// Deletes all listed keys. Missing keys are ignored.
	fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`KeyValueStore`] implementations and the [`TokenStore`] adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend or the adapter.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Keys the adapter reads and writes, derived from an application namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreKeys {
	/// Key holding the serialized [`TokenRecord`].
	pub tokens: String,
	/// Key holding the boolean connection flag.
	pub connected: String,
}
impl StoreKeys {
	/// Derives `<namespace>.tokens` and `<namespace>.connected`.
	pub fn for_namespace(namespace: &str) -> Self {
		Self { tokens: format!("{namespace}.tokens"), connected: format!("{namespace}.connected") }
	}
}
impl Default for StoreKeys {
	fn default() -> Self {
		Self::for_namespace(DEFAULT_NAMESPACE)
	}
}

/// Token-aware adapter over a [`KeyValueStore`]. It carries no business logic.
#[derive(Clone)]
pub struct TokenStore {
	backend: Arc<dyn KeyValueStore>,
	keys: StoreKeys,
}
impl TokenStore {
	/// Wraps a backend using the default namespace.
	pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
		Self { backend, keys: StoreKeys::default() }
	}

	/// Wraps a backend using a custom namespace.
	pub fn with_namespace(backend: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
		Self { backend, keys: StoreKeys::for_namespace(namespace) }
	}

	/// Keys used by this adapter.
	pub fn keys(&self) -> &StoreKeys {
		&self.keys
	}

	/// Loads the persisted record, if one exists.
	pub async fn load_tokens(&self) -> Result<Option<TokenRecord>, StoreError> {
		let Some(value) = self.backend.get(&self.keys.tokens).await? else {
			return Ok(None);
		};

		serde_json::from_value(value).map(Some).map_err(|e| StoreError::Serialization {
			message: format!("Stored token record under {} is unreadable: {e}", self.keys.tokens),
		})
	}

	/// Persists `record`, replacing the previous record wholesale.
	pub async fn save_tokens(&self, record: &TokenRecord) -> Result<(), StoreError> {
		let value = serde_json::to_value(record).map_err(|e| StoreError::Serialization {
			message: format!("Token record could not be serialized: {e}"),
		})?;

		self.backend.set(&self.keys.tokens, value).await
	}

	/// Writes the connection flag.
	pub async fn set_connected(&self, connected: bool) -> Result<(), StoreError> {
		self.backend.set(&self.keys.connected, Value::Bool(connected)).await
	}

	/// Reads the connection flag; an absent or non-boolean value reads as `false`.
	pub async fn is_connected(&self) -> Result<bool, StoreError> {
		Ok(self.backend.get(&self.keys.connected).await?.and_then(|v| v.as_bool()).unwrap_or(false))
	}

	/// Removes the record and the connection flag together.
	pub async fn clear(&self) -> Result<(), StoreError> {
		self.backend.remove(&[self.keys.tokens.as_str(), self.keys.connected.as_str()]).await
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore").field("keys", &self.keys).finish_non_exhaustive()
	}
}
