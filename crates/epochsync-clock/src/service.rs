//! Clock synchronization service
//!
//! Offset estimation follows the usual two-timestamp exchange: record local
//! time `t0`, ask the server, record local time `t1`. With round trip
//! `rt = t1 - t0` and the server's answer `s`, the offset is
//! `s - (t0 + rt / 2)`, assuming symmetric latency.

use chrono::{DateTime, Utc};
use epochsync_api::{ClockSyncSample, SyncQuality};
use epochsync_config::ClockSettings;
use epochsync_util::{
    LocalClock, LoopHandle, Result, add_millis, duration_millis, millis_between,
    saturating_duration_until,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::TimeSource;

/// Estimates and serves server-synchronized time.
///
/// Cheap to clone; clones share the same offset and sample history.
/// Reads (`server_time`, `offset`, ...) never block on the network.
#[derive(Clone)]
pub struct ClockSyncService {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    source: Arc<dyn TimeSource>,
    clock: Arc<dyn LocalClock>,
    settings: ClockSettings,
    offset_millis: AtomicI64,
    in_flight: AtomicBool,
    /// Last successful sample
    samples: watch::Sender<Option<ClockSyncSample>>,
}

/// Clears the in-flight flag however the sync future ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ClockSyncService {
    pub fn new(
        source: Arc<dyn TimeSource>,
        clock: Arc<dyn LocalClock>,
        settings: ClockSettings,
    ) -> Self {
        let (samples, _) = watch::channel(None);
        Self {
            inner: Arc::new(ClockInner {
                source,
                clock,
                settings,
                offset_millis: AtomicI64::new(0),
                in_flight: AtomicBool::new(false),
                samples,
            }),
        }
    }

    /// Run one exchange with the time source.
    ///
    /// Never fails: on error the previous offset is kept and the returned
    /// sample has `round_trip_millis == 0`. If a sync is already running,
    /// returns the most recent sample without issuing a request.
    pub async fn sync(&self) -> ClockSyncSample {
        let Some(_guard) = InFlightGuard::try_acquire(&self.inner.in_flight) else {
            debug!("Clock sync already in flight");
            return self.current_sample();
        };

        let t0 = self.inner.clock.now();
        let result = self.inner.source.fetch_server_time().await;
        let t1 = self.inner.clock.now();

        match result {
            Ok(server_time) => {
                let round_trip = millis_between(t0, t1).max(0);
                let midpoint = add_millis(t0, round_trip / 2);
                let offset = millis_between(midpoint, server_time);
                self.inner.offset_millis.store(offset, Ordering::Release);

                let sample = ClockSyncSample {
                    offset_millis: offset,
                    round_trip_millis: (round_trip as u64).max(1),
                    sampled_at_local: t1,
                };
                self.inner.samples.send_replace(Some(sample));

                debug!(
                    offset_ms = offset,
                    round_trip_ms = sample.round_trip_millis,
                    source = %self.inner.source.describe(),
                    "Clock synchronized"
                );
                sample
            }
            Err(e) => {
                let offset = self.offset();
                warn!(
                    error = %e,
                    retained_offset_ms = offset,
                    source = %self.inner.source.describe(),
                    "Clock sync failed, keeping previous offset"
                );
                ClockSyncSample {
                    offset_millis: offset,
                    round_trip_millis: 0,
                    sampled_at_local: t1,
                }
            }
        }
    }

    /// Local time corrected by the current offset
    pub fn server_time(&self) -> DateTime<Utc> {
        add_millis(self.inner.clock.now(), self.offset())
    }

    /// Time from synchronized now until `target`, zero if already past
    pub fn time_until(&self, target: DateTime<Utc>) -> Duration {
        saturating_duration_until(target, self.server_time())
    }

    pub fn offset(&self) -> i64 {
        self.inner.offset_millis.load(Ordering::Acquire)
    }

    /// Whether the last successful sync is older than the sync interval.
    ///
    /// A sample taken in the local clock's future means the clock stepped
    /// back since, which also invalidates the offset.
    pub fn needs_sync(&self) -> bool {
        match *self.inner.samples.borrow() {
            None => true,
            Some(sample) => {
                let age = millis_between(sample.sampled_at_local, self.inner.clock.now());
                age < 0 || age >= duration_millis(self.inner.settings.sync_interval)
            }
        }
    }

    pub fn last_sample(&self) -> Option<ClockSyncSample> {
        *self.inner.samples.borrow()
    }

    pub fn sync_quality(&self) -> SyncQuality {
        self.last_sample()
            .map(|s| SyncQuality::from_round_trip(s.round_trip_millis))
            .unwrap_or(SyncQuality::Lost)
    }

    /// Observe successful samples as they land
    pub fn watch_samples(&self) -> watch::Receiver<Option<ClockSyncSample>> {
        self.inner.samples.subscribe()
    }

    fn current_sample(&self) -> ClockSyncSample {
        self.last_sample().unwrap_or_else(|| ClockSyncSample {
            offset_millis: self.offset(),
            round_trip_millis: 0,
            sampled_at_local: self.inner.clock.now(),
        })
    }

    /// Sync now, then re-sync whenever the offset goes stale.
    ///
    /// Staleness is checked every `poll_interval`. The returned handle stops
    /// the loop on cancel or drop.
    pub fn start_auto_sync(&self) -> Result<LoopHandle> {
        let service = self.clone();
        let poll = self.inner.settings.poll_interval;

        info!(
            source = %self.inner.source.describe(),
            sync_interval_secs = self.inner.settings.sync_interval.as_secs(),
            poll_interval_secs = poll.as_secs(),
            "Starting clock auto-sync"
        );

        LoopHandle::spawn("clock-auto-sync", move |mut shutdown| async move {
            service.sync().await;

            let mut interval = tokio::time::interval_at(Instant::now() + poll, poll);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if service.needs_sync() {
                            service.sync().await;
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Clock auto-sync shutting down");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ClockSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockSyncService")
            .field("source", &self.inner.source.describe())
            .field("offset_millis", &self.offset())
            .field("last_sample", &self.last_sample())
            .finish()
    }
}
