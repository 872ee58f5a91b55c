//! Tracker configuration: the validated set of recognized options consumed by the pipeline.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Collection endpoint for the `qc` environment.
pub const QC_API_URL: &str = "https://tracking.api.qc.founder-os.ai/api";

/// Collection endpoint for the `production` environment.
pub const PRODUCTION_API_URL: &str = "https://tracking.api.founder-os.ai/api";

/// Target environment, selecting the default collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Quality-control environment.
    Qc,
    /// Production environment.
    #[default]
    Production,
}

/// Where identity and queue records are persisted between page loads / app restarts.
///
/// The mode describes the host platform's storage medium. The core maps `None` to the no-op
/// backend; for `Cookie` and `LocalStorage` the host wrapper supplies a matching
/// [`StorageBackend`](crate::storage::StorageBackend) implementation (file-backed device storage
/// stands in for `localstorage` on native platforms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Cookie-backed storage (browsers).
    #[default]
    Cookie,
    /// Device-local storage (browser localStorage or a file on native platforms).
    LocalStorage,
    /// No persistence; the pipeline is memory-only.
    None,
}

/// Recognized tracker options.
///
/// Deserializes from a plain JSON option map. Unrecognized keys are ignored, not errors, so host
/// wrappers can forward raw script-tag attributes or bridge arguments as-is. Every field has a
/// default; [`TrackerConfig::validate`] checks the required ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Batch events instead of sending each one individually.
    pub batch_requests: bool,
    /// Maximum number of events per batch; reaching it triggers a flush.
    pub batch_size: usize,
    /// Interval between timer-driven flushes, in milliseconds.
    pub batch_flush_interval_ms: u64,
    /// Per-request network timeout for a batch delivery, in milliseconds.
    pub batch_request_timeout_ms: u64,
    /// Start the delivery timer at initialization instead of on first enqueue.
    pub batch_autostart: bool,

    /// Maximum number of retries for a batch after its first failed delivery.
    pub max_batch_retries: u32,
    /// Initial wait before retrying a failed batch, in milliseconds. Doubles per attempt.
    pub retry_interval_ms: u64,
    /// Upper bound on the retry wait, in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Hard cap on pending events; beyond it the oldest events are evicted first.
    pub max_queue_size: usize,

    /// Storage medium for persisted state.
    pub persistence: PersistenceMode,
    /// Disable all persistence regardless of `persistence`.
    pub disable_persistence: bool,
    /// Storage key for the pending-event queue mirror.
    pub persistence_name: String,

    /// Storage key for the identity record.
    pub cookie_name: String,
    /// Domain scope for cookie-backed storage. Empty means the current domain.
    pub cookie_domain: String,
    /// Cookie lifetime in days.
    pub cookie_expiration: u32,
    /// Set `SameSite=None; Secure` on cookies.
    pub cross_site_cookie: bool,
    /// Scope cookies to the registrable domain so subdomains share them.
    pub cross_subdomain_cookie: bool,
    /// Do not persist the identity record to cookie storage.
    pub disable_cookie: bool,

    /// Inactivity window after which the session is rotated, in milliseconds.
    pub session_timeout: u64,

    /// Property and trait keys stripped from every event before it is stamped.
    pub property_blacklist: Vec<String>,
    /// Allow the collection endpoint to record the client IP address.
    pub ip: bool,

    /// Explicit collection endpoint, overriding the environment default.
    pub api_url: Option<String>,
    /// Target environment.
    pub environment: Environment,
    /// API key sent with every delivery request.
    pub x_api_key: String,
}

impl Default for TrackerConfig {
    fn default() -> TrackerConfig {
        TrackerConfig {
            batch_requests: true,
            batch_size: 50,
            batch_flush_interval_ms: 5_000,
            batch_request_timeout_ms: 30_000,
            batch_autostart: true,
            max_batch_retries: 3,
            retry_interval_ms: 3_000,
            max_retry_delay_ms: 30_000,
            max_queue_size: 10_000,
            persistence: PersistenceMode::default(),
            disable_persistence: false,
            persistence_name: "fos_events".to_owned(),
            cookie_name: "fos".to_owned(),
            cookie_domain: String::new(),
            cookie_expiration: 365,
            cross_site_cookie: false,
            cross_subdomain_cookie: true,
            disable_cookie: false,
            session_timeout: 1_800_000,
            property_blacklist: Vec::new(),
            ip: true,
            api_url: None,
            environment: Environment::default(),
            x_api_key: String::new(),
        }
    }
}

impl TrackerConfig {
    /// Build a configuration from a raw JSON option map.
    ///
    /// Unrecognized keys are ignored. A value of the wrong type for a recognized key is an error.
    pub fn from_json(value: serde_json::Value) -> std::result::Result<TrackerConfig, ConfigurationError> {
        serde_json::from_value(value).map_err(|err| ConfigurationError::Malformed(err.to_string()))
    }

    /// The collection endpoint deliveries go to: the explicit `api_url` override if set,
    /// otherwise the environment default.
    pub fn api_url(&self) -> &str {
        match &self.api_url {
            Some(url) => url,
            None => match self.environment {
                Environment::Qc => QC_API_URL,
                Environment::Production => PRODUCTION_API_URL,
            },
        }
    }

    /// Check the required fields, returning every missing or blank one at once.
    pub fn validate(&self, brand_id: &str) -> std::result::Result<(), ConfigurationError> {
        let mut missing = Vec::new();
        if brand_id.trim().is_empty() {
            missing.push("brand_id");
        }
        if self.x_api_key.trim().is_empty() {
            missing.push("x_api_key");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::MissingFields(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn api_url_follows_environment() {
        let mut config = TrackerConfig::default();

        config.environment = Environment::Qc;
        assert_eq!(config.api_url(), "https://tracking.api.qc.founder-os.ai/api");

        config.environment = Environment::Production;
        assert_eq!(config.api_url(), "https://tracking.api.founder-os.ai/api");
    }

    #[test]
    fn explicit_api_url_overrides_environment() {
        let config = TrackerConfig {
            api_url: Some("https://collector.example.com/api".to_owned()),
            environment: Environment::Qc,
            ..TrackerConfig::default()
        };

        assert_eq!(config.api_url(), "https://collector.example.com/api");
    }

    #[test]
    fn validate_lists_every_missing_field() {
        let config = TrackerConfig::default();

        let err = config.validate("  ").unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::MissingFields(vec!["brand_id", "x_api_key"])
        );
    }

    #[test]
    fn validate_accepts_complete_configuration() {
        let config = TrackerConfig {
            x_api_key: "key-123".to_owned(),
            ..TrackerConfig::default()
        };

        assert_eq!(config.validate("acme"), Ok(()));
    }

    #[test]
    fn from_json_ignores_unrecognized_keys() {
        let config = TrackerConfig::from_json(json!({
            "batch_size": 10,
            "environment": "qc",
            "x_api_key": "key-123",
            "widget_color": "#ff00ff",
            "some_future_option": {"nested": true},
        }))
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.environment, Environment::Qc);
        assert_eq!(config.x_api_key, "key-123");
        // Everything else keeps its default.
        assert!(config.batch_requests);
    }

    #[test]
    fn from_json_rejects_wrongly_typed_values() {
        let result = TrackerConfig::from_json(json!({"batch_size": "lots"}));

        assert!(matches!(result, Err(ConfigurationError::Malformed(_))));
    }

    #[test]
    fn persistence_mode_uses_lowercase_names() {
        let config = TrackerConfig::from_json(json!({"persistence": "localstorage"})).unwrap();
        assert_eq!(config.persistence, PersistenceMode::LocalStorage);

        let config = TrackerConfig::from_json(json!({"persistence": "none"})).unwrap();
        assert_eq!(config.persistence, PersistenceMode::None);
    }
}
