//! Scripted time source for testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use epochsync_util::{LocalClock, ManualClock, add_millis};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::{TimeSource, TimeSourceError, TimeSourceResult};

/// Mock time server.
///
/// The server clock runs `server_offset` ahead of a shared [`ManualClock`].
/// Each request advances that clock by the configured latency, half before
/// the server reads its time and half after, so the measured round trip and
/// offset are exact.
#[derive(Debug)]
pub struct MockTimeSource {
    clock: ManualClock,
    server_offset_ms: AtomicI64,
    requests: AtomicU64,

    /// Simulated network latency, applied to the manual clock
    pub latency: Arc<Mutex<Duration>>,

    /// Real (tokio) delay before answering
    pub delay: Arc<Mutex<Option<Duration>>>,

    /// Configure requests to fail
    pub failure: Arc<Mutex<Option<TimeSourceError>>>,
}

impl MockTimeSource {
    pub fn new(clock: ManualClock, server_offset_ms: i64) -> Self {
        Self {
            clock,
            server_offset_ms: AtomicI64::new(server_offset_ms),
            requests: AtomicU64::new(0),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            delay: Arc::new(Mutex::new(None)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    pub fn set_server_offset(&self, offset_ms: i64) {
        self.server_offset_ms.store(offset_ms, Ordering::SeqCst);
    }

    /// Make every following request fail with `error`, or succeed again with `None`
    pub fn set_failure(&self, error: Option<TimeSourceError>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Number of requests received, failed ones included
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSource for MockTimeSource {
    async fn fetch_server_time(&self) -> TimeSourceResult<DateTime<Utc>> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        let half = latency / 2;
        self.clock.advance(half);

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let result = match failure {
            Some(error) => Err(error),
            None => Ok(add_millis(
                self.clock.now(),
                self.server_offset_ms.load(Ordering::SeqCst),
            )),
        };

        self.clock.advance(latency - half);
        result
    }

    fn describe(&self) -> String {
        "mock time source".into()
    }
}
