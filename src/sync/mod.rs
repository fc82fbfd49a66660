//! Session persistence module
//!
//! The scan inventory and the append-only session log that makes an
//! interrupted replication resumable.

mod inventory;
mod session;

pub use inventory::*;
pub use session::*;
