//! Clock synchronization for epochsync
//!
//! Estimates the offset between the local clock and an authoritative server
//! clock with a two-timestamp exchange, keeps it fresh with a background
//! loop, and serves synchronized time without any I/O on the read path.
//!
//! The [`TimeSource`] trait is the seam to the network; [`HttpTimeSource`]
//! talks to a real endpoint and [`MockTimeSource`] scripts one for tests.

mod http;
mod mock;
mod service;
mod source;

pub use http::*;
pub use mock::*;
pub use service::*;
pub use source::*;
