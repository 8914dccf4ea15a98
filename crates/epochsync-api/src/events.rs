//! Events emitted by the epoch state machine and streamed by the daemon

use chrono::{DateTime, Utc};
use epochsync_util::EpochId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{API_VERSION, ClockSyncSample, Epoch, EpochPhase, WarningSeverity, duration_ms};

/// A phase boundary was crossed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub from: EpochPhase,
    pub to: EpochPhase,
    /// Snapshot taken right after the phase changed
    pub epoch: Epoch,
    /// Synchronized time at which the transition was observed
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub observed_at: DateTime<Utc>,
}

/// The ACTIVE phase is about to close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningEvent {
    pub epoch_id: EpochId,
    pub threshold_seconds: u64,
    #[serde(rename = "time_remaining_ms", with = "duration_ms")]
    pub time_remaining: Duration,
    pub severity: WarningSeverity,
    pub message: Option<String>,
}

/// Emitted on every tick for live countdowns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub epoch_id: EpochId,
    pub phase: EpochPhase,
    #[serde(rename = "time_remaining_ms", with = "duration_ms")]
    pub time_remaining: Duration,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub server_time: DateTime<Utc>,
    /// In PRE_EPOCH: whether the opening countdown (`opens_at`) has begun
    pub opening: bool,
}

/// Everything delivered to `on_event` subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EpochEvent {
    Transition(TransitionEvent),
    Warning(WarningEvent),
    Tick(TickEvent),
}

impl EpochEvent {
    pub fn is_transition(&self) -> bool {
        matches!(self, EpochEvent::Transition(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, EpochEvent::Warning(_))
    }

    pub fn is_tick(&self) -> bool {
        matches!(self, EpochEvent::Tick(_))
    }
}

/// Event envelope written by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: epochsync_util::now(),
            payload,
        }
    }
}

/// All events the daemon streams to its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A new epoch replaced the previous one
    EpochLoaded { epoch: Epoch },

    Transition(TransitionEvent),

    Warning(WarningEvent),

    Tick(TickEvent),

    /// A clock sync completed successfully
    ClockSynced(ClockSyncSample),

    /// Service is shutting down
    Shutdown,
}

impl From<EpochEvent> for EventPayload {
    fn from(event: EpochEvent) -> Self {
        match event {
            EpochEvent::Transition(e) => EventPayload::Transition(e),
            EpochEvent::Warning(e) => EventPayload::Warning(e),
            EpochEvent::Tick(e) => EventPayload::Tick(e),
        }
    }
}
