use std::sync::Arc;

/// Represents a result type for operations in the FounderOS SDK.
///
/// This type alias is used throughout the SDK to indicate the result of operations that may return
/// errors specific to the FounderOS SDK.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// SDK-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the FounderOS SDK.
///
/// Only configuration and validation errors surface to callers synchronously. Delivery-path
/// failures (network errors, rejected batches, unavailable storage) are absorbed inside the
/// pipeline and reported through logging and [`StatsSnapshot`](crate::events::StatsSnapshot)
/// counters, preserving the fire-and-forget contract of the tracking calls.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Bad or missing required configuration. Fatal to initialization; the tracker remains
    /// uninitialized.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Bad call arguments. Rejects that one call; the tracker is otherwise unaffected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Indicates that the delivery thread panicked. This should normally never happen.
    #[error("delivery thread panicked")]
    DeliveryThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

/// Errors detected while validating a [`TrackerConfig`](crate::TrackerConfig) at initialization.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// One or more required fields are missing or blank. The list names every offending field so
    /// callers can report them all at once.
    #[error("missing or blank configuration fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// The supplied option map could not be deserialized into a configuration.
    #[error("malformed configuration: {0}")]
    Malformed(String),
}

/// Errors detected while validating the arguments of a single tracking call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// `track` and `screen` require a non-blank event name.
    #[error("event name must not be blank")]
    BlankEventName,

    /// `identify` requires a non-blank user id.
    #[error("user id must not be blank")]
    BlankUserId,
}
