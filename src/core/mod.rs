//! Core replication module
//!
//! Provides the copy pass, the metadata replay and the orchestration that
//! runs them against a session.

mod copier;
mod replay;
mod replicator;

pub use copier::*;
pub use replay::*;
pub use replicator::*;
