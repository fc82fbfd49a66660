//! Configuration module for drive-replica
//!
//! Provides the CLI arguments and the runtime settings of a replication.

mod settings;

pub use settings::*;
