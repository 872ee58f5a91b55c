//! The event model and the delivery pipeline.
//!
//! Events flow from the tracker facade into the [`EventQueue`], from which the background
//! [`DeliveryThread`] drains batches and hands them to a [`Transport`]. Failed batches return to
//! the head of the queue so nothing is reordered past them; exhausted batches are dropped and
//! counted.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SdkMetadata, Str};

mod delivery;
mod event_queue;
mod transport;

pub use delivery::{DeliveryConfig, DeliveryThread};
pub use event_queue::EventQueue;
pub use transport::{HttpTransport, Transport, TransportOutcome};

#[cfg(test)]
pub(crate) use transport::testing;

/// Free-form key/value payload attached to events, traits, and context metadata.
pub type Properties = HashMap<String, serde_json::Value>;

/// Kind of a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A custom behavioral event.
    Track,
    /// A user identification event.
    Identify,
    /// A page or screen view.
    Screen,
}

/// Name and version of the SDK that captured an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryMetadata {
    pub name: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub core_version: Cow<'static, str>,
}

impl From<SdkMetadata> for LibraryMetadata {
    fn from(sdk: SdkMetadata) -> LibraryMetadata {
        LibraryMetadata {
            name: Cow::Borrowed(sdk.name),
            version: Cow::Borrowed(sdk.version),
            core_version: Cow::Borrowed(env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LibraryMetadata {
    fn default() -> LibraryMetadata {
        SdkMetadata::default().into()
    }
}

/// Page or screen the event was captured on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub referrer: Option<String>,
}

impl PageContext {
    /// A page context carrying only a URL.
    pub fn from_url(url: impl Into<String>) -> PageContext {
        PageContext {
            url: url.into(),
            title: None,
            referrer: None,
        }
    }
}

/// Metadata snapshot attached to every event at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub brand_id: Str,
    pub anonymous_id: Str,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<Str>,
    pub session_id: Str,
    pub library: LibraryMetadata,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page: Option<PageContext>,
    /// Process-wide metadata merged in via `setMetadata`.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: Properties,
    /// Present (and `false`) only when IP collection is disabled, telling the collection
    /// endpoint not to record the client address.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip: Option<bool>,
}

/// An immutable captured event.
///
/// Every event carries a context and a timestamp; `track` and `screen` events additionally carry
/// a name. Serialized camelCase for the wire and the persistence mirror alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<Str>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<Str>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub traits: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub properties: Option<Properties>,
    pub context: Context,
    pub timestamp: DateTime<Utc>,
}

/// An ordered group of events sent together in one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    /// Monotonically increasing per delivery thread.
    pub sequence: u64,
    pub events: Vec<Event>,
}

/// Diagnostics counters for the pipeline. Shared between the queue, the delivery thread, and the
/// tracker; read via [`PipelineStats::snapshot`].
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued_events: AtomicU64,
    delivered_events: AtomicU64,
    delivered_batches: AtomicU64,
    retried_batches: AtomicU64,
    dropped_batches: AtomicU64,
    evicted_events: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn record_enqueue(&self) {
        self.enqueued_events.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_delivery(&self, events: usize) {
        self.delivered_events.fetch_add(events as u64, Ordering::SeqCst);
        self.delivered_batches.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_retry(&self) {
        self.retried_batches.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_dropped_batch(&self) {
        self.dropped_batches.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_eviction(&self) {
        self.evicted_events.fetch_add(1, Ordering::SeqCst);
    }

    /// Take a consistent-enough copy of the counters for diagnostics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued_events: self.enqueued_events.load(Ordering::SeqCst),
            delivered_events: self.delivered_events.load(Ordering::SeqCst),
            delivered_batches: self.delivered_batches.load(Ordering::SeqCst),
            retried_batches: self.retried_batches.load(Ordering::SeqCst),
            dropped_batches: self.dropped_batches.load(Ordering::SeqCst),
            evicted_events: self.evicted_events.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub enqueued_events: u64,
    pub delivered_events: u64,
    pub delivered_batches: u64,
    pub retried_batches: u64,
    pub dropped_batches: u64,
    pub evicted_events: u64,
}

#[cfg(test)]
pub(crate) fn test_event(name: &str) -> Event {
    Event {
        event_type: EventType::Track,
        name: Some(Str::from(name)),
        user_id: None,
        traits: None,
        properties: None,
        context: Context {
            brand_id: Str::from("test-brand"),
            anonymous_id: Str::from("anon-1"),
            user_id: None,
            session_id: Str::from("session-1"),
            library: LibraryMetadata::default(),
            page: None,
            metadata: Properties::new(),
            ip: None,
        },
        timestamp: DateTime::<Utc>::UNIX_EPOCH,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn events_serialize_camel_case_with_iso_timestamps() {
        let event = test_event("Button Clicked");

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], json!("track"));
        assert_eq!(value["name"], json!("Button Clicked"));
        assert_eq!(value["context"]["anonymousId"], json!("anon-1"));
        assert_eq!(value["context"]["sessionId"], json!("session-1"));
        assert_eq!(value["timestamp"], json!("1970-01-01T00:00:00Z"));
        // Absent optionals are omitted, not null.
        assert!(value.get("userId").is_none());
        assert!(value["context"].get("ip").is_none());
    }

    #[test]
    fn events_round_trip_through_json() {
        let mut event = test_event("Signup Completed");
        event.properties = Some(
            [("plan".to_owned(), json!("pro"))]
                .into_iter()
                .collect::<Properties>(),
        );

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, event);
    }
}
