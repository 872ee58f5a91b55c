//! `founderos_core` is a common library to build FounderOS tracking SDKs for different host
//! platforms. If you're tracking events from a Rust application, you probably want the `founderos`
//! crate instead, which wraps this library in a friendlier API.
//!
//! # Overview
//!
//! `founderos_core` is organized as a set of building blocks that help to build tracking
//! SDKs. Different platforms have different constraints. Some platforms might use all building
//! blocks and others might reimplement some pieces in the host language (notably storage, which is
//! backed by cookies in browsers).
//!
//! [`Tracker`] is the heart of an SDK. It validates public calls ([`Tracker::track`],
//! [`Tracker::identify`], [`Tracker::screen`], ...), stamps every event with an atomically-taken
//! [`Context`](events::Context) snapshot, and routes events into the delivery pipeline. One
//! `Tracker` is created per brand id; all operations go through the handle rather than any global
//! state.
//!
//! [`TrackerConfig`] is the validated set of recognized options (batching, persistence, cookie
//! scope, session, privacy, environment). It deserializes from a plain JSON option map, ignoring
//! unrecognized keys, so host wrappers can forward whatever they collected from script-tag
//! attributes or bridge arguments.
//!
//! [`storage`] defines the [`StorageBackend`](storage::StorageBackend) capability that lets the
//! pipeline survive reloads and restarts. The core ships in-memory, file-backed, and no-op
//! implementations; cookie-backed storage is supplied by host wrappers through the same trait.
//!
//! [`identity`] owns the anonymous id, the identified user, and the current session, rotating the
//! session lazily when it expires. [`continuity`] lets a session started on one domain continue on
//! another by round-tripping a token through a URL query parameter.
//!
//! [`events`] contains the event model and the pipeline itself: the
//! [`EventQueue`](events::EventQueue) buffer, the [`Transport`](events::Transport) seam with its
//! HTTP implementation, and the [`DeliveryThread`](events::DeliveryThread) that batches, flushes,
//! and retries in the background without ever blocking the caller.
//!
//! # Versioning
//!
//! This library follows semver. However, it is considered an internal library, so expect frequent
//! breaking changes and major version bumps.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod continuity;
pub mod events;
pub mod identity;
pub mod storage;

mod configuration;
mod error;
mod sdk_metadata;
mod str;
mod tracker;

pub use crate::str::Str;
pub use configuration::{Environment, PersistenceMode, TrackerConfig};
pub use error::{ConfigurationError, Error, Result, ValidationError};
pub use sdk_metadata::SdkMetadata;
pub use tracker::{Tracker, TrackerOptions};
