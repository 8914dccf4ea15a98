//! Validated settings structures

use crate::schema::{RawClockConfig, RawConfig, RawEpochConfig, RawWarningThreshold};
use crate::validation::parse_severity;
use epochsync_api::{WarningSeverity, WarningThreshold};
use std::time::Duration;

pub const DEFAULT_TIME_FIELD: &str = "serverTime";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PRE_EPOCH_SECS: u64 = 300;
pub const DEFAULT_COOLDOWN_SECS: u64 = 120;
pub const DEFAULT_TICK_PERIOD_MS: u64 = 1_000;
pub const DEFAULT_WARNING_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_WARNING_DEBOUNCE_SECS: u64 = 5;
pub const DEFAULT_WARNING_SECONDS: u64 = 30;

/// Validated settings ready for use by the clock service and state machine
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub clock: ClockSettings,
    pub epoch: EpochSettings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            clock: ClockSettings::from_raw(raw.clock),
            epoch: EpochSettings::from_raw(raw.epoch),
        }
    }
}

/// Clock synchronization settings
#[derive(Debug, Clone)]
pub struct ClockSettings {
    pub time_url: String,
    pub time_field: String,
    pub request_timeout: Duration,
    /// Maximum age of the last successful sync
    pub sync_interval: Duration,
    /// How often the auto-sync loop checks staleness
    pub poll_interval: Duration,
}

impl ClockSettings {
    fn from_raw(raw: RawClockConfig) -> Self {
        Self {
            time_url: raw.time_url.trim().to_string(),
            time_field: raw
                .time_field
                .unwrap_or_else(|| DEFAULT_TIME_FIELD.to_string()),
            request_timeout: Duration::from_millis(
                raw.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            sync_interval: Duration::from_secs(
                raw.sync_interval_seconds.unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
            ),
            poll_interval: Duration::from_secs(
                raw.poll_interval_seconds.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
        }
    }
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            time_url: "http://127.0.0.1:8080/time".to_string(),
            time_field: DEFAULT_TIME_FIELD.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// Epoch phase timing
#[derive(Debug, Clone)]
pub struct EpochSettings {
    pub pre_epoch_duration: Duration,
    pub cooldown_duration: Duration,
    pub tick_period: Duration,
    /// Each warning fires while remaining time is in `(threshold - window, threshold]`
    pub warning_window: Duration,
    /// Minimum time between two warnings for the same threshold
    pub warning_debounce: Duration,
    pub warnings: Vec<WarningThreshold>,
}

impl EpochSettings {
    fn from_raw(raw: RawEpochConfig) -> Self {
        let warnings = raw
            .warnings
            .map(|w| w.into_iter().map(convert_warning).collect())
            .unwrap_or_else(default_warning_thresholds);

        Self {
            pre_epoch_duration: Duration::from_secs(
                raw.pre_epoch_seconds.unwrap_or(DEFAULT_PRE_EPOCH_SECS),
            ),
            cooldown_duration: Duration::from_secs(
                raw.cooldown_seconds.unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            tick_period: Duration::from_millis(
                raw.tick_period_ms.unwrap_or(DEFAULT_TICK_PERIOD_MS),
            ),
            warning_window: Duration::from_millis(
                raw.warning_window_ms.unwrap_or(DEFAULT_WARNING_WINDOW_MS),
            ),
            warning_debounce: Duration::from_secs(
                raw.warning_debounce_seconds
                    .unwrap_or(DEFAULT_WARNING_DEBOUNCE_SECS),
            ),
            warnings,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_duration = cooldown;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<WarningThreshold>) -> Self {
        self.warnings = warnings;
        self
    }
}

impl Default for EpochSettings {
    fn default() -> Self {
        Self {
            pre_epoch_duration: Duration::from_secs(DEFAULT_PRE_EPOCH_SECS),
            cooldown_duration: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            tick_period: Duration::from_millis(DEFAULT_TICK_PERIOD_MS),
            warning_window: Duration::from_millis(DEFAULT_WARNING_WINDOW_MS),
            warning_debounce: Duration::from_secs(DEFAULT_WARNING_DEBOUNCE_SECS),
            warnings: default_warning_thresholds(),
        }
    }
}

fn convert_warning(raw: RawWarningThreshold) -> WarningThreshold {
    WarningThreshold {
        seconds_before: raw.seconds_before,
        severity: parse_severity(&raw.severity).unwrap_or(WarningSeverity::Warn),
        message_template: raw.message,
    }
}

fn default_warning_thresholds() -> Vec<WarningThreshold> {
    vec![WarningThreshold {
        seconds_before: DEFAULT_WARNING_SECONDS,
        severity: WarningSeverity::Warn,
        message_template: Some("Epoch closes in 30 seconds".into()),
    }]
}
