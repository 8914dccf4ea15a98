//! epochsyncd service internals
//!
//! The binary wires these together:
//! - Command handling against the clock service and state machine
//! - NDJSON request reading and output writing
//! - The main service loop with reload and shutdown control

mod daemon;
mod epoch_file;
mod handler;
mod io;

pub use daemon::*;
pub use epoch_file::*;
pub use handler::*;
pub use io::*;
