//! Configuration validation

use crate::schema::{RawClockConfig, RawConfig, RawEpochConfig};
use crate::settings::{
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_TICK_PERIOD_MS,
    DEFAULT_WARNING_DEBOUNCE_SECS, DEFAULT_WARNING_WINDOW_MS,
};
use epochsync_api::WarningSeverity;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[clock] {0}")]
    ClockError(String),

    #[error("[epoch] {0}")]
    EpochError(String),

    #[error("Duplicate warning threshold: {0}s")]
    DuplicateWarning(u64),

    #[error("Warning at {seconds}s: {message}")]
    WarningError { seconds: u64, message: String },

    #[error("Warning window {window_ms}ms is narrower than the tick period {tick_ms}ms; ticks could skip it")]
    WarningWindowTooNarrow { window_ms: u64, tick_ms: u64 },

    #[error("Warning debounce {debounce_ms}ms is shorter than the warning window {window_ms}ms")]
    DebounceShorterThanWindow { debounce_ms: u64, window_ms: u64 },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_clock(&config.clock);
    errors.extend(validate_epoch(&config.epoch));
    errors
}

fn validate_clock(clock: &RawClockConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(e) = parse_time_url(&clock.time_url) {
        errors.push(ValidationError::ClockError(e));
    }

    if let Some(field) = &clock.time_field
        && field.trim().is_empty()
    {
        errors.push(ValidationError::ClockError("time_field cannot be empty".into()));
    }

    if clock.request_timeout_ms == Some(0) {
        errors.push(ValidationError::ClockError(
            "request_timeout_ms must be greater than 0".into(),
        ));
    }

    let sync_interval = clock.sync_interval_seconds.unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
    let poll_interval = clock.poll_interval_seconds.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

    if sync_interval == 0 {
        errors.push(ValidationError::ClockError(
            "sync_interval_seconds must be greater than 0".into(),
        ));
    }
    if poll_interval == 0 {
        errors.push(ValidationError::ClockError(
            "poll_interval_seconds must be greater than 0".into(),
        ));
    }
    if poll_interval > sync_interval {
        errors.push(ValidationError::ClockError(format!(
            "poll_interval_seconds ({}) exceeds sync_interval_seconds ({})",
            poll_interval, sync_interval
        )));
    }

    errors
}

fn validate_epoch(epoch: &RawEpochConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let tick_ms = epoch.tick_period_ms.unwrap_or(DEFAULT_TICK_PERIOD_MS);
    let window_ms = epoch.warning_window_ms.unwrap_or(DEFAULT_WARNING_WINDOW_MS);
    let debounce_ms = epoch
        .warning_debounce_seconds
        .unwrap_or(DEFAULT_WARNING_DEBOUNCE_SECS)
        .saturating_mul(1000);

    if tick_ms == 0 {
        errors.push(ValidationError::EpochError(
            "tick_period_ms must be greater than 0".into(),
        ));
    }
    if window_ms == 0 {
        errors.push(ValidationError::EpochError(
            "warning_window_ms must be greater than 0".into(),
        ));
    } else if window_ms < tick_ms {
        errors.push(ValidationError::WarningWindowTooNarrow { window_ms, tick_ms });
    }
    if debounce_ms < window_ms {
        errors.push(ValidationError::DebounceShorterThanWindow {
            debounce_ms,
            window_ms,
        });
    }

    if let Some(warnings) = &epoch.warnings {
        let mut seen = HashSet::new();
        for warning in warnings {
            if !seen.insert(warning.seconds_before) {
                errors.push(ValidationError::DuplicateWarning(warning.seconds_before));
            }
            if warning.seconds_before == 0 {
                errors.push(ValidationError::WarningError {
                    seconds: 0,
                    message: "seconds_before must be greater than 0".into(),
                });
            }
            if let Err(e) = parse_severity(&warning.severity) {
                errors.push(ValidationError::WarningError {
                    seconds: warning.seconds_before,
                    message: e,
                });
            }
        }
    }

    errors
}

/// Check that the time URL is an absolute http(s) URL
pub fn parse_time_url(url: &str) -> Result<&str, String> {
    let url = url.trim();
    if url.is_empty() {
        return Err("time_url cannot be empty".into());
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| format!("time_url must start with http:// or https://, got '{}'", url))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(format!("time_url has no host: '{}'", url));
    }
    Ok(url)
}

/// Parse a severity name
pub fn parse_severity(s: &str) -> Result<WarningSeverity, String> {
    match s.to_lowercase().as_str() {
        "info" => Ok(WarningSeverity::Info),
        "warn" | "warning" => Ok(WarningSeverity::Warn),
        "critical" => Ok(WarningSeverity::Critical),
        other => Err(format!("Unknown severity: {}", other)),
    }
}
