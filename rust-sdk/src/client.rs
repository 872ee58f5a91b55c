#[cfg(doc)]
use crate::Error;
use crate::{ClientConfig, Properties, Result, StatsSnapshot, TrackerConfig};

use founderos_core::{Tracker, TrackerOptions, SdkMetadata};

/// A client for the FounderOS tracking API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// Tracking calls are fire-and-forget: they validate their arguments, stamp the event with a
/// fresh context snapshot, and enqueue it. Delivery happens on a background thread with batching
/// and bounded retries; failures there never surface from tracking calls.
///
/// # Examples
/// ```no_run
/// # use founderos::{Client, ClientConfig};
/// # fn main() -> founderos::Result<()> {
/// let client = ClientConfig::new("acme", "pk_live_123").to_client()?;
/// client.track("Checkout Started", None)?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    tracker: Tracker,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the brand id or API key is blank. The error lists
    /// every offending field.
    pub fn new(config: ClientConfig) -> Result<Client> {
        let options = TrackerOptions {
            storage: config.resolve_storage(),
            page_url: config.page_url.clone(),
            sdk: Some(SdkMetadata {
                name: "founderos-rust",
                version: env!("CARGO_PKG_VERSION"),
            }),
        };

        let tracker = Tracker::init(&config.brand_id, config.config, options)?;
        Ok(Client { tracker })
    }

    /// Capture a custom behavioral event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `name` is blank.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use serde_json::json;
    /// # fn test(client: &founderos::Client) -> founderos::Result<()> {
    /// client.track(
    ///     "Plan Upgraded",
    ///     Some([("plan".to_owned(), json!("pro"))].into_iter().collect()),
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn track(&self, name: &str, properties: Option<Properties>) -> Result<()> {
        self.tracker.track(name, properties)
    }

    /// Capture a page or screen view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `name` is blank.
    pub fn screen(&self, name: &str, properties: Option<Properties>) -> Result<()> {
        self.tracker.screen(name, properties)
    }

    /// Identify the current user and merge `traits` into their stored ones. New keys overwrite,
    /// others are retained across calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `user_id` is blank.
    pub fn identify(&self, user_id: &str, traits: Option<Properties>) -> Result<()> {
        self.tracker.identify(user_id, traits)
    }

    /// Merge profile traits without changing the identified user.
    ///
    /// # Errors
    ///
    /// Currently infallible; returns `Result` for parity with the other tracking calls.
    pub fn set(&self, traits: Properties) -> Result<()> {
        self.tracker.set(traits)
    }

    /// Merge process-wide metadata stamped into the context of every subsequent event.
    pub fn set_metadata(&self, metadata: Properties) {
        self.tracker.set_metadata(metadata)
    }

    /// Clear session, user id, and traits; with `all`, also discard the anonymous id.
    pub fn reset(&self, all: bool) {
        self.tracker.reset(all)
    }

    /// Ask the pipeline to flush pending events now. Never blocks.
    pub fn flush(&self) {
        self.tracker.flush()
    }

    /// Replace the configuration in place (same brand id). Pending events are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when a required field is blank.
    pub fn reconfigure(&self, config: TrackerConfig) -> Result<()> {
        self.tracker.reconfigure(config)
    }

    /// Tear the pipeline down with a best-effort final flush bounded by a short timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeliveryThreadPanicked`] if the delivery thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        self.tracker.shutdown()
    }

    /// Diagnostics counters for the pipeline.
    pub fn stats(&self) -> StatsSnapshot {
        self.tracker.stats()
    }

    /// Number of events waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.tracker.pending()
    }
}
