use std::time::Duration;

use crate::transport::TransportError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while scheduling an outbound call.
///
/// Every outcome is reported to the caller explicitly; nothing is swallowed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request sat in the queue past its maximum wait and was never sent.
    #[error("admission timed out after {waited:?} in queue")]
    AdmissionTimeout {
        /// How long the request waited before giving up.
        waited: Duration,
    },

    /// The caller cancelled the request while it was still queued.
    #[error("request cancelled while queued")]
    Cancelled,

    /// The remote kept answering 429 past the retry budget. The request was
    /// sent at least once.
    #[error("rate limit still exceeded after {attempts} attempts")]
    RateLimitExhausted {
        /// Total transport attempts made before giving up.
        attempts: u32,
    },

    /// Network or connection failure raised by the transport. Not retried.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The remote answered with a non-429 error status. Not retried; retry
    /// policy for these is the caller's responsibility.
    #[error("upstream returned status {status}")]
    UpstreamStatus {
        /// HTTP status code returned by the marketplace.
        status: u16,
    },

    /// Invalid category table or route rules at construction. Fatal before
    /// any request is accepted.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// True when the failure came from the remote signalling rate pressure,
    /// i.e. the call may succeed after a refill window.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimitExhausted { .. })
    }
}
