//! Call-level error taxonomy shared by every source adapter.
//!
//! Row-level problems never surface here; they are counted and logged by the
//! normalizer. Callers decide on retries using [`GenMixError::is_retryable`].

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenMixError {
    /// The BA code has no registered adapter.
    #[error("unknown source: '{0}'")]
    UnknownSource(String),

    /// Network failure, timeout or non-success status reaching the upstream feed.
    #[error("{ba} upstream unavailable: {reason}")]
    UpstreamUnavailable { ba: &'static str, reason: String },

    /// A payload arrived but does not match the expected schema.
    #[error("{ba} returned a malformed payload: {reason}")]
    MalformedPayload { ba: &'static str, reason: String },

    /// The requested window lies outside what the upstream source retains.
    #[error("{ba} cannot serve the requested range: {reason}")]
    RangeUnavailable { ba: &'static str, reason: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Settings that cannot be turned into a working client.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GenMixError {
    pub fn upstream(ba: &'static str, reason: impl Into<String>) -> Self {
        GenMixError::UpstreamUnavailable { ba, reason: reason.into() }
    }

    pub fn malformed(ba: &'static str, reason: impl Into<String>) -> Self {
        GenMixError::MalformedPayload { ba, reason: reason.into() }
    }

    pub fn range(ba: &'static str, reason: impl Into<String>) -> Self {
        GenMixError::RangeUnavailable { ba, reason: reason.into() }
    }

    /// Only transient upstream failures are worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenMixError::UpstreamUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, GenMixError>;
