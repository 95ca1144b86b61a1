use crate::backend::{Backend, Decision, SlidingWindowInput, SlidingWindowOutput};
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60 * 10;

/// A sliding-window [Backend] that uses [Dashmap](dashmap::DashMap) to store
/// windows in memory.
///
/// Suitable for tests and single-process deployments; a multi-process
/// deployment needs a shared tracker such as the Redis backend.
#[derive(Clone)]
pub struct InMemorySlidingWindow {
    map: Arc<DashMap<String, Window>>,
    gc_handle: Option<Arc<JoinHandle<()>>>,
}

struct Window {
    hits: VecDeque<Instant>,
    expires_at: Instant,
}

impl InMemorySlidingWindow {
    pub fn builder() -> InMemorySlidingWindowBuilder {
        InMemorySlidingWindowBuilder {
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECONDS)),
        }
    }

    fn garbage_collector(map: Arc<DashMap<String, Window>>, interval: Duration) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                map.retain(|_k, w| w.expires_at > now);
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

impl Backend for InMemorySlidingWindow {
    type Error = Infallible;

    async fn check(
        &self,
        input: SlidingWindowInput,
    ) -> Result<(Decision, SlidingWindowOutput), Self::Error> {
        let now = Instant::now();
        let mut entry = self.map.entry(input.key).or_insert_with(|| Window {
            hits: VecDeque::new(),
            expires_at: now + input.interval,
        });
        let window = entry.value_mut();
        // Drop hits that have slid out of the trailing interval.
        while let Some(front) = window.hits.front() {
            if now.saturating_duration_since(*front) >= input.interval {
                window.hits.pop_front();
            } else {
                break;
            }
        }
        // The request is recorded whether or not it is allowed, matching the
        // external tracker's behaviour.
        window.hits.push_back(now);
        window.expires_at = now + input.interval;
        let count = window.hits.len() as u64;
        let oldest = window.hits.front().copied().unwrap_or(now);

        let allow = count <= input.max_requests;
        let output = SlidingWindowOutput {
            limit: input.max_requests,
            remaining: input.max_requests.saturating_sub(count),
            reset: oldest + input.interval,
        };
        Ok((Decision::from_allowed(allow), output))
    }
}

impl Drop for InMemorySlidingWindow {
    fn drop(&mut self) {
        if let Some(handle) = &self.gc_handle {
            handle.abort();
        }
    }
}

pub struct InMemorySlidingWindowBuilder {
    gc_interval: Option<Duration>,
}

impl InMemorySlidingWindowBuilder {
    /// Override the default garbage collector interval.
    ///
    /// Set to None to disable garbage collection.
    ///
    /// The garbage collector periodically scans the internal map, removing
    /// windows with no recent activity.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn build(self) -> InMemorySlidingWindow {
        let map = Arc::new(DashMap::<String, Window>::new());
        let gc_handle = self.gc_interval.map(|gc_interval| {
            Arc::new(InMemorySlidingWindow::garbage_collector(
                map.clone(),
                gc_interval,
            ))
        });
        InMemorySlidingWindow { map, gc_handle }
    }
}
