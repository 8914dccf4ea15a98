//! Shared types for the epochsync API

use chrono::{DateTime, Utc};
use epochsync_util::{EpochId, EpochSyncError, ParticipantId, duration_millis, millis_between};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Serde helper: `std::time::Duration` as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Lifecycle stage of an epoch. Strictly linear: no phase is ever re-entered
/// for the same epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochPhase {
    PreEpoch,
    Active,
    Cooldown,
    Settling,
}

impl EpochPhase {
    /// Phase for synchronized time `now` given the epoch boundaries
    pub fn classify(
        now: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cooldown: Duration,
    ) -> Self {
        if now < start {
            EpochPhase::PreEpoch
        } else if now < end {
            EpochPhase::Active
        } else if millis_between(end, now) < duration_millis(cooldown) {
            EpochPhase::Cooldown
        } else {
            EpochPhase::Settling
        }
    }

    /// The phase that follows this one, `None` for the terminal phase
    pub fn next(self) -> Option<Self> {
        match self {
            EpochPhase::PreEpoch => Some(EpochPhase::Active),
            EpochPhase::Active => Some(EpochPhase::Cooldown),
            EpochPhase::Cooldown => Some(EpochPhase::Settling),
            EpochPhase::Settling => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == EpochPhase::Settling
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EpochPhase::PreEpoch => "PRE_EPOCH",
            EpochPhase::Active => "ACTIVE",
            EpochPhase::Cooldown => "COOLDOWN",
            EpochPhase::Settling => "SETTLING",
        }
    }
}

impl fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boundary data pushed in by the scheduling service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochBoundary {
    pub epoch_id: EpochId,

    #[serde(rename = "start_timestamp", with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,

    #[serde(rename = "end_timestamp", with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_ranking: Option<Vec<ParticipantId>>,
}

impl EpochBoundary {
    pub fn new(epoch_id: impl Into<EpochId>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            epoch_id: epoch_id.into(),
            start,
            end,
            locked_ranking: None,
        }
    }

    pub fn with_locked_ranking(mut self, ranking: Vec<ParticipantId>) -> Self {
        self.locked_ranking = Some(ranking);
        self
    }

    /// Check the caller contract: non-empty id and `end > start`
    pub fn validate(&self) -> Result<(), EpochSyncError> {
        if self.epoch_id.is_empty() {
            return Err(EpochSyncError::invalid_boundary("epoch id is empty"));
        }
        if self.end <= self.start {
            return Err(EpochSyncError::invalid_boundary(format!(
                "epoch {}: end {} is not after start {}",
                self.epoch_id,
                self.end.timestamp_millis(),
                self.start.timestamp_millis()
            )));
        }
        Ok(())
    }
}

/// One entry of the authoritative final ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub participant: ParticipantId,
    pub rank: u32,
    pub score: f64,
}

/// Read-only snapshot of the loaded epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub id: EpochId,

    #[serde(rename = "start_timestamp", with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,

    #[serde(rename = "end_timestamp", with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,

    /// When the pre-epoch countdown opens (`start - pre_epoch_duration`)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub opens_at: DateTime<Utc>,

    pub phase: EpochPhase,

    #[serde(default)]
    pub locked_ranking: Vec<ParticipantId>,

    #[serde(default)]
    pub final_ranking: Option<Vec<RankedEntry>>,
}

/// Warning severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    Info,
    #[default]
    Warn,
    Critical,
}

/// Warning threshold configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningThreshold {
    /// Seconds before the end of ACTIVE at which the warning fires
    pub seconds_before: u64,
    pub severity: WarningSeverity,
    pub message_template: Option<String>,
}

impl WarningThreshold {
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.seconds_before)
    }
}

/// One clock synchronization measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSyncSample {
    /// Best estimate of (server time - local time)
    pub offset_millis: i64,

    /// Latency of the exchange; `0` means the sample carries no new information
    pub round_trip_millis: u64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sampled_at_local: DateTime<Utc>,
}

impl ClockSyncSample {
    /// Whether this sample came from a completed round trip
    pub fn is_fresh(&self) -> bool {
        self.round_trip_millis > 0
    }
}

/// Quality of the current clock offset estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncQuality {
    /// Round trip under 250ms
    Good,
    /// Round trip under 1s
    Degraded,
    /// Slow round trip, or never synced
    Lost,
}

impl SyncQuality {
    pub fn from_round_trip(round_trip_millis: u64) -> Self {
        match round_trip_millis {
            0..250 => SyncQuality::Good,
            250..1000 => SyncQuality::Degraded,
            _ => SyncQuality::Lost,
        }
    }
}

/// Full status snapshot for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub api_version: u32,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub server_time: DateTime<Utc>,

    pub offset_millis: i64,
    pub sync_quality: SyncQuality,
    pub last_sample: Option<ClockSyncSample>,
    pub epoch: Option<Epoch>,

    #[serde(rename = "time_remaining_ms", with = "duration_ms")]
    pub time_remaining: Duration,
}
