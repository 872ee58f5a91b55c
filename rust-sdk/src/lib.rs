//! The Rust SDK for FounderOS, a customer analytics platform for product-led companies.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that captures behavioral events — page/screen views,
//! custom `track` calls, `identify` calls — and delivers them reliably to the FounderOS
//! collection endpoint. Events are buffered locally, coalesced into batches, and retried on
//! transient network failures, so tracking calls are fire-and-forget and never block on I/O.
//!
//! One client is created per brand id via [`ClientConfig`]; all operations go through the client
//! handle rather than any global state.
//!
//! # Identity and sessions
//!
//! Every event carries a context snapshot: a device-stable anonymous id, the identified user (if
//! [`Client::identify`] was called), and a session id that rotates after a configurable window of
//! inactivity. With persistence enabled, identity and any undelivered events survive process
//! restarts.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Only configuration and call-argument problems
//! surface as errors; delivery failures are retried in the background and reported through
//! [`Client::stats`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages. Consider integrating a `log`-compatible logger implementation for better visibility
//! into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! use founderos::{Client, ClientConfig};
//!
//! # fn main() -> founderos::Result<()> {
//! let client = ClientConfig::new("acme", "pk_live_123").to_client()?;
//!
//! client.track("Signup Completed", None)?;
//! client.identify("user-1", None)?;
//!
//! client.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;

#[doc(inline)]
pub use founderos_core::{
    continuity::ContinuationToken,
    events::{Context, Event, EventType, PageContext, Properties, StatsSnapshot},
    storage::{FileStorage, MemoryStorage, NoopStorage, StorageBackend},
    ConfigurationError, Environment, Error, PersistenceMode, Result, TrackerConfig,
    ValidationError,
};

pub use client::Client;
pub use config::ClientConfig;
