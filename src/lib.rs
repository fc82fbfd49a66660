//! # drive-replica - Resumable Drive Replication
//!
//! drive-replica copies a whole drive or folder and restores what a plain
//! content copy loses: hardlinks, junctions and the read-only, hidden,
//! system and archive attributes of directories.
//!
//! ## Pipeline
//!
//! - **Scan**: walk the source top-down, classify every entry and build an
//!   [`sync::Inventory`]
//! - **Snapshot**: persist the inventory as the head of the session file
//! - **Copy**: recreate the tree directory by directory, appending every
//!   confirmed path to the session
//! - **Replay**: apply directory attributes, recreate junctions, then link
//!   hardlink siblings to their canonical copy
//!
//! An interrupted run is resumed from the session file; logged paths are
//! skipped.
//!
//! ## Quick Start
//!
//! ```no_run
//! use drive_replica::config::ReplicaConfig;
//! use drive_replica::core::Replicator;
//! use std::path::PathBuf;
//!
//! let config = ReplicaConfig {
//!     source: PathBuf::from("/data"),
//!     destination: PathBuf::from("/mnt/backup/data"),
//!     exclude: vec!["*.tmp".to_string()],
//!     ..Default::default()
//! };
//!
//! let result = Replicator::new(config).run_fresh().unwrap();
//! result.print_summary();
//! ```
//!
//! ## Resuming
//!
//! ```no_run
//! use drive_replica::config::ReplicaConfig;
//! use drive_replica::core::Replicator;
//! use drive_replica::sync::SessionLog;
//!
//! let log = SessionLog::new("drive-replica.jsonl");
//! let session = log.load().unwrap();
//! let config = ReplicaConfig::from_session(&session.header, log.path());
//! let result = Replicator::new(config).resume(&session).unwrap();
//! assert!(result.resumed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod logging;
pub mod progress;
pub mod sync;

// Re-export commonly used types
pub use config::ReplicaConfig;
pub use core::{ReplicationResult, Replicator};
pub use error::{ReplicaError, Result};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use drive_replica::prelude::*;
    //! ```

    pub use crate::config::{CliArgs, ReplicaConfig};
    pub use crate::core::{CopyEngine, MetadataReplayer, ReplicationResult, Replicator};
    pub use crate::error::{ReplicaError, Result};
    pub use crate::fs::{Capabilities, ExclusionSet, PathClassifier, ScanConfig, ScanEngine};
    pub use crate::progress::ProgressReporter;
    pub use crate::sync::{Inventory, Session, SessionLog};
}
