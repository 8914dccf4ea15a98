//! Core epoch engine for epochsync
//!
//! This crate contains the phase logic:
//! - Epoch phase evaluation driven by synchronized time
//! - Transition, warning and tick events
//! - Subscriber fan-out with per-callback isolation

mod bus;
mod machine;

pub use bus::*;
pub use machine::*;
