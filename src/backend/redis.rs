use crate::backend::{Backend, Decision, SlidingWindowInput, SlidingWindowOutput};
use actix_web::rt::time::Instant;
use redis::aio::ConnectionManager;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        redis::RedisError,
    ),
    #[error("System clock is set before the Unix epoch")]
    Clock,
    #[error("Window unexpectedly empty after recording the request")]
    EmptyWindow,
}

/// A sliding-window [Backend] backed by a hosted Redis quota tracker.
///
/// Each window is a sorted set of request timestamps (epoch milliseconds).
/// A single atomic pipeline prunes entries that have slid out of the window,
/// records the new request, counts the set and reads the oldest entry, so
/// concurrent callers always observe increment-and-check semantics.
#[derive(Clone)]
pub struct RedisSlidingWindow {
    connection: ConnectionManager,
    key_prefix: Option<String>,
    // Disambiguates members recorded within the same millisecond.
    sequence: Arc<AtomicU64>,
}

impl RedisSlidingWindow {
    /// Create a RedisSlidingWindowBuilder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use actix_admission_gate::backend::redis::RedisSlidingWindow;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let backend = RedisSlidingWindow::builder(manager).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        prefixed_key(self.key_prefix.as_deref(), key)
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all quota keys given to this backend.
    ///
    /// This may be useful when the Redis instance is being used for other
    /// purposes; the prefix is used as a 'namespace' to avoid collision with
    /// other caches or keys inside Redis.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisSlidingWindow {
        RedisSlidingWindow {
            connection: self.connection,
            key_prefix: self.key_prefix,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Backend for RedisSlidingWindow {
    type Error = Error;

    async fn check(
        &self,
        input: SlidingWindowInput,
    ) -> Result<(Decision, SlidingWindowOutput), Self::Error> {
        let key = self.make_key(&input.key);
        let now_ms = epoch_millis()?;
        let window_ms = input.interval.as_millis() as u64;
        let member = format!("{now_ms}-{}", self.sequence.fetch_add(1, Ordering::Relaxed));

        let mut pipe = redis::pipe();
        pipe.atomic()
            // Prune entries that have slid out of the trailing window
            .cmd("ZREMRANGEBYSCORE")
            .arg(key.as_ref())
            .arg("-inf")
            .arg(now_ms.saturating_sub(window_ms))
            .ignore()
            // Record this request
            .cmd("ZADD")
            .arg(key.as_ref())
            .arg(now_ms)
            .arg(&member)
            .ignore()
            // Count requests inside the window
            .cmd("ZCARD")
            .arg(key.as_ref())
            // Oldest entry still inside the window, for the reset time
            .cmd("ZRANGE")
            .arg(key.as_ref())
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            // Bound the key's lifetime so idle windows are reclaimed
            .cmd("PEXPIRE")
            .arg(key.as_ref())
            .arg(window_ms)
            .ignore();

        let mut con = self.connection.clone();
        let (count, oldest): (u64, Vec<(String, u64)>) = pipe.query_async(&mut con).await?;
        let oldest_ms = oldest.first().map(|(_, score)| *score).ok_or(Error::EmptyWindow)?;

        let allow = count <= input.max_requests;
        let output = SlidingWindowOutput {
            limit: input.max_requests,
            remaining: input.max_requests.saturating_sub(count),
            reset: reset_instant(now_ms, oldest_ms, window_ms),
        };
        Ok((Decision::from_allowed(allow), output))
    }
}

fn prefixed_key<'t>(prefix: Option<&str>, key: &'t str) -> Cow<'t, str> {
    match prefix {
        None => Cow::Borrowed(key),
        Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
    }
}

fn epoch_millis() -> Result<u64, Error> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| Error::Clock)?;
    Ok(elapsed.as_millis() as u64)
}

// The window clears when the oldest recorded request slides out.
fn reset_instant(now_ms: u64, oldest_ms: u64, window_ms: u64) -> Instant {
    let clears_at_ms = oldest_ms.saturating_add(window_ms);
    Instant::now() + Duration::from_millis(clears_at_ms.saturating_sub(now_ms))
}
