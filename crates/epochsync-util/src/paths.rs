//! Default paths for epochsync components
//!
//! The daemon needs only a configuration file. Its default location is
//! user-writable (no root required):
//! - `$EPOCHSYNC_CONFIG` if set
//! - `$XDG_CONFIG_HOME/epochsync/config.toml`
//! - `~/.config/epochsync/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the configuration file path
pub const EPOCHSYNC_CONFIG_ENV: &str = "EPOCHSYNC_CONFIG";

/// Application subdirectory name
const APP_DIR: &str = "epochsync";

/// Configuration filename within the application directory
const CONFIG_FILENAME: &str = "config.toml";

/// Get the default configuration file path.
///
/// Order of precedence:
/// 1. `$EPOCHSYNC_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/epochsync/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/epochsync/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(EPOCHSYNC_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    config_path_without_env()
}

/// Get the config path without checking the EPOCHSYNC_CONFIG env var.
pub fn config_path_without_env() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    // Last resort
    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}
