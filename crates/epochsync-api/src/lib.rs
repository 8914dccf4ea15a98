//! Shared types for epochsync
//!
//! This crate defines the data model exchanged between the core and its
//! collaborators:
//! - Epochs, phases and rankings
//! - Clock synchronization samples
//! - Events emitted by the state machine
//! - Commands and responses for the daemon's NDJSON protocol
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
