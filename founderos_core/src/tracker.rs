//! The tracker facade: validated public operations, context stamping, queue routing.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{Duration, Utc};

use crate::continuity;
use crate::events::{
    Context, DeliveryConfig, DeliveryThread, Event, EventQueue, EventType, HttpTransport,
    PageContext, PipelineStats, Properties, StatsSnapshot,
};
use crate::identity::{IdentityManager, IdentitySnapshot};
use crate::storage::{MemoryStorage, NoopStorage, StorageBackend};
use crate::{PersistenceMode, Result, SdkMetadata, Str, TrackerConfig, ValidationError};

/// Initialization options that don't belong to the recognized configuration surface: the platform
/// storage backend, the landing URL, and the embedding SDK's metadata.
#[derive(Default)]
pub struct TrackerOptions {
    /// Platform storage. When absent, the core falls back to in-memory storage (or no-op storage
    /// if persistence is disabled by configuration).
    pub storage: Option<Arc<dyn StorageBackend>>,
    /// URL the tracker is initialized on. Used both for the page context stamped into events and
    /// for cross-domain session continuity.
    pub page_url: Option<String>,
    /// Metadata of the embedding SDK, stamped into every event's context.
    pub sdk: Option<SdkMetadata>,
}

/// A tracking pipeline instance for one brand.
///
/// `Tracker` is an explicit handle: all operations go through it, and dropping it tears the
/// pipeline down (with a best-effort final flush). Public methods are synchronous up to the point
/// of enqueueing and never block on network I/O; delivery happens on a background thread.
pub struct Tracker {
    brand_id: Str,
    config: RwLock<Arc<TrackerConfig>>,
    identity: Mutex<IdentityManager>,
    metadata: Mutex<Properties>,
    page: Mutex<Option<PageContext>>,
    queue: Arc<EventQueue>,
    stats: Arc<PipelineStats>,
    delivery: Mutex<Option<DeliveryThread>>,
    sdk: SdkMetadata,
}

impl Tracker {
    /// Initialize a tracker for `brand_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) when `brand_id` or a
    /// required configuration field is blank. The error lists every offending field.
    pub fn init(brand_id: &str, config: TrackerConfig, options: TrackerOptions) -> Result<Tracker> {
        config.validate(brand_id)?;
        let config = Arc::new(config);
        let session_timeout = Duration::milliseconds(config.session_timeout as i64);

        let stats = Arc::new(PipelineStats::default());
        let (identity_storage, queue_storage) = resolve_storage(&config, options.storage);

        let now = Utc::now();
        let token = options
            .page_url
            .as_deref()
            .and_then(|url| continuity::resolve_url(url, session_timeout, now));

        let identity = IdentityManager::load(
            identity_storage,
            config.cookie_name.clone(),
            brand_id,
            session_timeout,
            token,
            now,
        );

        let queue = Arc::new(EventQueue::new(
            config.max_queue_size,
            queue_storage,
            config.persistence_name.clone(),
            Arc::clone(&stats),
        ));

        let tracker = Tracker {
            brand_id: Str::from(brand_id),
            config: RwLock::new(Arc::clone(&config)),
            identity: Mutex::new(identity),
            metadata: Mutex::new(Properties::new()),
            page: Mutex::new(options.page_url.map(PageContext::from_url)),
            queue,
            stats,
            delivery: Mutex::new(None),
            sdk: options.sdk.unwrap_or_default(),
        };

        if config.batch_autostart {
            drop(tracker.delivery_handle());
        }

        log::debug!(target: "founderos", brand_id; "tracker initialized");
        Ok(tracker)
    }

    /// Replace the configuration in place. The brand id stays the same; use a fresh [`Tracker`]
    /// for a different brand.
    ///
    /// The delivery thread is restarted so new batching and endpoint settings take effect;
    /// pending events are preserved.
    pub fn reconfigure(&self, config: TrackerConfig) -> Result<()> {
        config.validate(&self.brand_id)?;
        let config = Arc::new(config);

        *self.config.write().expect("thread holding config lock should not panic") =
            Arc::clone(&config);
        self.identity
            .lock()
            .expect("thread holding identity lock should not panic")
            .set_session_timeout(Duration::milliseconds(config.session_timeout as i64));

        let previous = self
            .delivery
            .lock()
            .expect("thread holding delivery lock should not panic")
            .take();
        if let Some(previous) = previous {
            previous.shutdown()?;
        }
        if config.batch_autostart {
            drop(self.delivery_handle());
        }

        log::debug!(target: "founderos", brand_id = self.brand_id; "tracker reconfigured");
        Ok(())
    }

    /// Capture a custom behavioral event.
    ///
    /// Fire-and-forget: delivery failures are never surfaced here.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::BlankEventName`] if `name` is blank.
    pub fn track(&self, name: &str, properties: Option<Properties>) -> Result<()> {
        self.record_named(EventType::Track, name, properties)
    }

    /// Capture a page or screen view.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::BlankEventName`] if `name` is blank.
    pub fn screen(&self, name: &str, properties: Option<Properties>) -> Result<()> {
        self.record_named(EventType::Screen, name, properties)
    }

    /// Identify the current user and merge `traits` into their stored ones.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::BlankUserId`] if `user_id` is blank.
    pub fn identify(&self, user_id: &str, traits: Option<Properties>) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::BlankUserId.into());
        }

        let config = self.current_config();
        let mut traits = traits;
        if let Some(map) = traits.as_mut() {
            strip_blacklisted(map, &config.property_blacklist);
        }

        let now = Utc::now();
        let snapshot = {
            let mut identity = self.lock_identity();
            identity.touch(now);
            identity.identify(Str::from(user_id), traits.clone());
            identity.snapshot()
        };

        let event = Event {
            event_type: EventType::Identify,
            name: None,
            user_id: snapshot.user_id.clone(),
            traits,
            properties: None,
            context: self.build_context(&snapshot, &config),
            timestamp: now,
        };
        self.submit(event, &config);
        Ok(())
    }

    /// Merge profile traits without changing the identified user. Emits an identify event
    /// carrying the supplied traits.
    pub fn set(&self, traits: Properties) -> Result<()> {
        let config = self.current_config();
        let mut traits = traits;
        strip_blacklisted(&mut traits, &config.property_blacklist);

        let now = Utc::now();
        let snapshot = {
            let mut identity = self.lock_identity();
            identity.touch(now);
            identity.merge_traits(traits.clone());
            identity.snapshot()
        };

        let event = Event {
            event_type: EventType::Identify,
            name: None,
            user_id: snapshot.user_id.clone(),
            traits: Some(traits),
            properties: None,
            context: self.build_context(&snapshot, &config),
            timestamp: now,
        };
        self.submit(event, &config);
        Ok(())
    }

    /// Merge process-wide metadata stamped into the context of every subsequent event. Emits no
    /// event.
    pub fn set_metadata(&self, metadata: Properties) {
        self.metadata
            .lock()
            .expect("thread holding metadata lock should not panic")
            .extend(metadata);
    }

    /// Update the page context stamped into subsequent events (e.g., on navigation).
    pub fn set_page(&self, page: Option<PageContext>) {
        *self.page.lock().expect("thread holding page lock should not panic") = page;
    }

    /// Clear session, user id, and traits; with `all`, also discard the anonymous id so a fresh
    /// one is generated on the next event.
    pub fn reset(&self, all: bool) {
        self.lock_identity().reset(all, Utc::now());
        log::debug!(target: "founderos", brand_id = self.brand_id, all; "tracker reset");
    }

    /// Ask the pipeline to flush pending events now. Never blocks.
    pub fn flush(&self) {
        if self.queue.is_empty() {
            return;
        }
        if let Some(delivery) = self.delivery_handle().as_ref() {
            delivery.request_flush();
        }
    }

    /// Tear the pipeline down with a best-effort final flush bounded by a short timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeliveryThreadPanicked`](crate::Error::DeliveryThreadPanicked) if the
    /// delivery thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        let delivery = self
            .delivery
            .lock()
            .expect("thread holding delivery lock should not panic")
            .take();
        match delivery {
            Some(delivery) => delivery.shutdown(),
            None => Ok(()),
        }
    }

    /// Diagnostics counters for the pipeline.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of events waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The brand this tracker was initialized for.
    pub fn brand_id(&self) -> &str {
        &self.brand_id
    }

    fn record_named(
        &self,
        event_type: EventType,
        name: &str,
        properties: Option<Properties>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ValidationError::BlankEventName.into());
        }

        let config = self.current_config();
        let mut properties = properties;
        if let Some(map) = properties.as_mut() {
            strip_blacklisted(map, &config.property_blacklist);
        }

        let now = Utc::now();
        let snapshot = {
            let mut identity = self.lock_identity();
            identity.touch(now);
            identity.snapshot()
        };

        let event = Event {
            event_type,
            name: Some(Str::from(name)),
            user_id: None,
            traits: None,
            properties,
            context: self.build_context(&snapshot, &config),
            timestamp: now,
        };
        self.submit(event, &config);
        Ok(())
    }

    fn build_context(&self, snapshot: &IdentitySnapshot, config: &TrackerConfig) -> Context {
        Context {
            brand_id: self.brand_id.clone(),
            anonymous_id: snapshot.anonymous_id.clone(),
            user_id: snapshot.user_id.clone(),
            session_id: snapshot.session_id.clone(),
            library: self.sdk.into(),
            page: self
                .page
                .lock()
                .expect("thread holding page lock should not panic")
                .clone(),
            metadata: self
                .metadata
                .lock()
                .expect("thread holding metadata lock should not panic")
                .clone(),
            ip: if config.ip { None } else { Some(false) },
        }
    }

    fn submit(&self, event: Event, config: &TrackerConfig) {
        self.queue.enqueue(event);

        if let Some(delivery) = self.delivery_handle().as_ref() {
            if !config.batch_requests || self.queue.len() >= config.batch_size {
                delivery.request_flush();
            }
        }
    }

    fn current_config(&self) -> Arc<TrackerConfig> {
        Arc::clone(&self.config.read().expect("thread holding config lock should not panic"))
    }

    fn lock_identity(&self) -> MutexGuard<'_, IdentityManager> {
        self.identity
            .lock()
            .expect("thread holding identity lock should not panic")
    }

    /// The delivery thread handle, starting the thread on first use (or at init when
    /// `batch_autostart` is set).
    fn delivery_handle(&self) -> MutexGuard<'_, Option<DeliveryThread>> {
        let mut guard = self
            .delivery
            .lock()
            .expect("thread holding delivery lock should not panic");

        if guard.is_none() {
            let config = self.current_config();
            let started = DeliveryThread::start(
                Arc::clone(&self.queue),
                HttpTransport::new(&config),
                DeliveryConfig::from_tracker_config(&config),
                Arc::clone(&self.stats),
            );
            match started {
                Ok(handle) => *guard = Some(handle),
                Err(err) => {
                    log::error!(target: "founderos", "failed to start delivery thread: {err}");
                }
            }
        }

        guard
    }
}

fn resolve_storage(
    config: &TrackerConfig,
    supplied: Option<Arc<dyn StorageBackend>>,
) -> (Arc<dyn StorageBackend>, Option<Arc<dyn StorageBackend>>) {
    if config.disable_persistence || config.persistence == PersistenceMode::None {
        return (Arc::new(NoopStorage), None);
    }

    let base = supplied.unwrap_or_else(|| Arc::new(MemoryStorage::new()));

    // `disable_cookie` only silences the identity record; the queue mirror is governed by
    // `disable_persistence`.
    let identity: Arc<dyn StorageBackend> =
        if config.disable_cookie && config.persistence == PersistenceMode::Cookie {
            Arc::new(NoopStorage)
        } else {
            Arc::clone(&base)
        };

    (identity, Some(base))
}

fn strip_blacklisted(map: &mut Properties, blacklist: &[String]) {
    for key in blacklist {
        if map.remove(key).is_some() {
            log::debug!(target: "founderos", key; "stripped blacklisted property");
        }
    }
}
