#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use actix_web::rt::time::Instant;
use std::future::Future;
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Describes an implementation of a sliding-window quota store.
///
/// All quota state lives in the backend; the gate holds none of its own. The
/// backend must atomically record the request and evaluate the window, so
/// that concurrent callers cannot slip past the limit between a read and a
/// write. A Backend is required to implement [Clone], usually this means
/// wrapping your data store within an [Arc](std::sync::Arc), although many
/// connection pools already do so internally; there is no need to wrap it
/// twice.
pub trait Backend: Clone {
    type Error;

    /// Record an incoming request against `input.key` and evaluate its
    /// sliding window.
    ///
    /// Returns whether the request is within quota, along with the window
    /// status used to build the rate limit headers.
    fn check(
        &self,
        input: SlidingWindowInput,
    ) -> impl Future<Output = Result<(Decision, SlidingWindowOutput), Self::Error>>;
}

/// Input to a [Backend] check.
#[derive(Debug, Clone)]
pub struct SlidingWindowInput {
    /// The sliding window duration.
    pub interval: Duration,
    /// The total requests to be allowed within the window.
    pub max_requests: u64,
    /// The quota key for this request (traffic class prefix + client identity).
    pub key: String,
}

/// Window status returned from a [Backend] check.
#[derive(Debug, Clone)]
pub struct SlidingWindowOutput {
    /// Total number of requests that are permitted within the window.
    pub limit: u64,
    /// Number of requests that will be permitted until the window clears.
    pub remaining: u64,
    /// Time at which the window clears.
    pub reset: Instant,
}

impl SlidingWindowOutput {
    /// Seconds until the window clears (rounded upwards, so that it is
    /// guaranteed to have cleared after waiting for the duration).
    pub fn seconds_until_reset(&self) -> u64 {
        let millis = self
            .reset
            .saturating_duration_since(Instant::now())
            .as_millis() as f64;
        (millis / 1000f64).ceil() as u64
    }
}
