//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Authoritative time source and sync cadence
    pub clock: RawClockConfig,

    /// Epoch phase timing
    #[serde(default)]
    pub epoch: RawEpochConfig,
}

/// Clock synchronization settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawClockConfig {
    /// URL of the authoritative time endpoint
    pub time_url: String,

    /// JSON field holding the timestamp when the endpoint returns an object
    pub time_field: Option<String>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Maximum age of the last successful sync before a new one is needed
    pub sync_interval_seconds: Option<u64>,

    /// How often the auto-sync loop checks whether a sync is needed
    pub poll_interval_seconds: Option<u64>,
}

/// Epoch timing settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEpochConfig {
    /// Lead time before start during which the opening countdown runs
    pub pre_epoch_seconds: Option<u64>,

    /// Length of COOLDOWN after the epoch ends
    pub cooldown_seconds: Option<u64>,

    /// Tick period of the state machine loop
    pub tick_period_ms: Option<u64>,

    /// Width of each warning window, ending at the threshold
    pub warning_window_ms: Option<u64>,

    /// Minimum time between two warnings
    pub warning_debounce_seconds: Option<u64>,

    /// Warning thresholds before the end of ACTIVE
    pub warnings: Option<Vec<RawWarningThreshold>>,
}

/// Warning threshold
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawWarningThreshold {
    /// Seconds before the end of ACTIVE
    pub seconds_before: u64,

    /// Severity: "info", "warn", "critical"
    #[serde(default = "default_severity")]
    pub severity: String,

    /// Message template
    pub message: Option<String>,
}

fn default_severity() -> String {
    "warn".to_string()
}
