//! Progress reporting module
//!
//! Provides live scan counters and per-kind progress bars with throughput
//! and ETA display.

mod reporter;

pub use reporter::*;
