//! Shared utilities for epochsync
//!
//! This crate provides:
//! - ID types (EpochId, ParticipantId, SubscriptionId)
//! - Time utilities (local clocks, millisecond helpers, duration formatting)
//! - Error types
//! - Cancellable background loop handles
//! - Default paths for the configuration file

mod error;
mod ids;
mod paths;
mod task;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use task::*;
pub use time::*;
