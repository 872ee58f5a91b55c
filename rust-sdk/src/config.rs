use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use founderos_core::storage::{FileStorage, StorageBackend};
use founderos_core::{Environment, PersistenceMode, TrackerConfig};

use crate::Client;

/// Configuration for [`Client`].
///
/// # Examples
/// ```no_run
/// # use founderos::ClientConfig;
/// # fn main() -> founderos::Result<()> {
/// let client = ClientConfig::new("acme", "pk_live_123")
///     .batch_size(20)
///     .flush_interval(std::time::Duration::from_secs(10))
///     .to_client()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientConfig {
    pub(crate) brand_id: String,
    pub(crate) config: TrackerConfig,
    pub(crate) storage: Option<Arc<dyn StorageBackend>>,
    pub(crate) storage_dir: Option<PathBuf>,
    pub(crate) page_url: Option<String>,
}

impl ClientConfig {
    /// Create a default configuration for the given brand using the specified API key.
    ///
    /// ```
    /// # use founderos::ClientConfig;
    /// ClientConfig::new("acme", "pk_live_123");
    /// ```
    pub fn new(brand_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        ClientConfig {
            brand_id: brand_id.into(),
            config: TrackerConfig {
                x_api_key: api_key.into(),
                // Native applications default to device-local storage; cookies are a browser
                // concept.
                persistence: PersistenceMode::LocalStorage,
                ..TrackerConfig::default()
            },
            storage: None,
            storage_dir: None,
            page_url: None,
        }
    }

    /// Build a configuration from a raw JSON option map, as collected by a host bridge.
    ///
    /// Unrecognized keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Malformed`](crate::ConfigurationError::Malformed) when a
    /// recognized key carries a value of the wrong type.
    pub fn from_options(
        brand_id: impl Into<String>,
        options: serde_json::Value,
    ) -> crate::Result<Self> {
        let config = TrackerConfig::from_json(options)?;
        Ok(ClientConfig {
            brand_id: brand_id.into(),
            config,
            storage: None,
            storage_dir: None,
            page_url: None,
        })
    }

    /// Select the target environment. Defaults to production.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    /// Override the collection endpoint. Clients should use the environment default in most
    /// cases.
    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.config.api_url = Some(api_url.into());
        self
    }

    /// Maximum number of events per delivery batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Interval between timer-driven flushes.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.batch_flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Disable batching: every event is sent immediately as a batch of one.
    pub fn batching(mut self, enabled: bool) -> Self {
        self.config.batch_requests = enabled;
        self
    }

    /// Start the delivery timer at initialization instead of on first enqueue.
    pub fn autostart(mut self, enabled: bool) -> Self {
        self.config.batch_autostart = enabled;
        self
    }

    /// Inactivity window after which the session is rotated.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout.as_millis() as u64;
        self
    }

    /// Property and trait keys stripped from every event.
    pub fn property_blacklist(mut self, keys: Vec<String>) -> Self {
        self.config.property_blacklist = keys;
        self
    }

    /// Disable all persistence; identity and queue live in memory only.
    pub fn in_memory(mut self) -> Self {
        self.config.disable_persistence = true;
        self
    }

    /// Persist identity and undelivered events under `dir` so they survive restarts.
    pub fn persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Supply a custom storage backend (e.g., a platform keychain wrapper). Takes precedence
    /// over [`ClientConfig::persistence_dir`].
    pub fn storage(mut self, storage: impl StorageBackend + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// URL the client is initialized on. Enables cross-domain session continuity and stamps a
    /// page context into events.
    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    /// Apply any remaining raw overrides on top of the builder state.
    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) when the brand id or API
    /// key is blank.
    pub fn to_client(self) -> crate::Result<Client> {
        Client::new(self)
    }
}

impl ClientConfig {
    pub(crate) fn resolve_storage(&self) -> Option<Arc<dyn StorageBackend>> {
        if let Some(storage) = &self.storage {
            return Some(Arc::clone(storage));
        }
        self.storage_dir
            .as_ref()
            .map(|dir| Arc::new(FileStorage::new(dir.clone())) as Arc<dyn StorageBackend>)
    }
}
