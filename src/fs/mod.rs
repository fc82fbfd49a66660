//! File system module
//!
//! Scanning, classification, exclusion rules, copy primitives and the
//! platform capabilities behind them.

mod classifier;
mod exclusion;
mod operations;
mod scanner;
pub mod platform;

pub use classifier::*;
pub use exclusion::*;
pub use operations::*;
pub use scanner::*;
pub use platform::{
    same_file, AttributeProvider, Capabilities, HardlinkResolver, JunctionHandler,
    NativeAttributes, NativeHardlinks, NativeJunctions, Probe, Siblings, TRACKED_ATTRIBUTES,
};
