//! Configuration settings for drive-replica
//!
//! Defines the CLI arguments, the runtime configuration derived from them
//! and the platform default exclusions.

use crate::error::{ReplicaError, Result as ReplicaResult};
use crate::sync::SessionHeader;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default session file name, created in the working directory
pub const DEFAULT_SESSION_FILE: &str = "drive-replica.jsonl";

/// System files that are never worth replicating, relative to the drive root
pub const WINDOWS_SYSTEM_EXCLUDES: [&str; 3] = ["hiberfil.sys", "pagefile.sys", "System Volume Information"];

/// drive-replica - resumable drive and folder replication
#[derive(Parser, Debug, Clone)]
#[command(name = "drive-replica")]
#[command(author = "Drive Replica Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replicate a drive or folder, keeping hardlinks, junctions and attributes")]
#[command(long_about = r#"
drive-replica copies a whole drive or folder to another location and restores
what an ordinary copy loses: hardlinks, junctions and the hidden, system,
read-only and archive attributes.

Progress is recorded in a session file. An interrupted run (Ctrl+C) can be
resumed by starting the program again; paths that were already copied are
skipped.

Exclusion rules:
  NAME or *.ext        a file or directory name anywhere (glob allowed)
  /full/path           that path and everything below it
  /full/path/*.tmp     matching names inside a directory (glob allowed)

Examples:
  drive-replica D:\ E:\backup                   # Replicate a drive
  drive-replica /data /mnt/copy "*.tmp" cache   # With exclusions
  drive-replica --resume                        # Continue the last session
  drive-replica status                          # Inspect the session file
"#)]
pub struct CliArgs {
    /// Source drive or directory
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Destination directory
    #[arg(value_name = "DESTINATION")]
    pub destination: Option<PathBuf>,

    /// Exclusion rules
    #[arg(value_name = "EXCLUDE")]
    pub rules: Vec<String>,

    /// Additional exclusion rule (repeatable)
    #[arg(short = 'e', long = "exclude", value_name = "RULE")]
    pub exclude: Vec<String>,

    /// Session file recording progress
    #[arg(short = 's', long, value_name = "PATH", env = "DRIVE_REPLICA_SESSION", default_value = DEFAULT_SESSION_FILE)]
    pub session: PathBuf,

    /// Resume an unfinished session without asking
    #[arg(long, conflicts_with = "fresh")]
    pub resume: bool,

    /// Discard an unfinished session and start over
    #[arg(long)]
    pub fresh: bool,

    /// Answer yes to every confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Fail on existing destination directories instead of merging into them
    #[arg(long)]
    pub no_merge: bool,

    /// Do not add the platform's system-file exclusions
    #[arg(long)]
    pub no_default_excludes: bool,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Log file path
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show what a session file contains and how far it got
    #[command(name = "status")]
    Status {
        /// Session file path (defaults to --session)
        session: Option<PathBuf>,
    },
}

/// Runtime configuration of one replication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Source root
    pub source: PathBuf,
    /// Destination root
    pub destination: PathBuf,
    /// User exclusion rules
    pub exclude: Vec<String>,
    /// Session file
    pub session: PathBuf,
    /// Merge into existing destination directories
    pub merge_existing: bool,
    /// Add platform system-file exclusions
    pub default_excludes: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            destination: PathBuf::new(),
            exclude: Vec::new(),
            session: PathBuf::from(DEFAULT_SESSION_FILE),
            merge_existing: true,
            default_excludes: true,
        }
    }
}

impl ReplicaConfig {
    /// Build configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        let source = args.source.as_ref().ok_or("Source path required")?;
        let destination = args.destination.as_ref().ok_or("Destination path required")?;

        let source = absolute(source)?;
        let destination = absolute(destination)?;
        if destination.starts_with(&source) {
            return Err(format!(
                "Destination {} lies inside the source {}",
                destination.display(),
                source.display()
            ));
        }

        let mut exclude = args.rules.clone();
        exclude.extend(args.exclude.iter().cloned());
        if let Some(rule) = exclude.iter().find(|r| r.trim().is_empty()) {
            return Err(format!("Empty exclusion rule {:?}", rule));
        }

        Ok(Self {
            source,
            destination,
            exclude,
            session: args.session.clone(),
            merge_existing: !args.no_merge,
            default_excludes: !args.no_default_excludes,
        })
    }

    /// Rebuild configuration from a stored session header
    ///
    /// The stored rules already include the default exclusions.
    pub fn from_session(header: &SessionHeader, session: impl Into<PathBuf>) -> Self {
        Self {
            source: PathBuf::from(&header.source),
            destination: PathBuf::from(&header.destination),
            exclude: header.exclude.clone(),
            session: session.into(),
            merge_existing: true,
            default_excludes: false,
        }
    }

    /// User rules plus the platform defaults, if enabled
    pub fn effective_excludes(&self) -> Vec<String> {
        let mut rules = self.exclude.clone();
        if self.default_excludes {
            for rule in default_excludes(&self.source) {
                if !rules.contains(&rule) {
                    rules.push(rule);
                }
            }
        }
        rules
    }

    /// Validate the source and destination roots before a fresh run
    ///
    /// Without merging, any existing destination is rejected, empty or not.
    pub fn check_destination(&self) -> ReplicaResult<()> {
        if !self.source.is_dir() {
            return Err(ReplicaError::InvalidPath(format!(
                "{} is not a directory",
                self.source.display()
            )));
        }
        if !self.destination.exists() {
            return Ok(());
        }
        if !self.destination.is_dir() {
            return Err(ReplicaError::Precondition(format!(
                "{} exists and is not a directory",
                self.destination.display()
            )));
        }
        if !self.merge_existing {
            return Err(ReplicaError::Precondition(format!(
                "{} already exists and merging is disabled",
                self.destination.display()
            )));
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf, String> {
    std::path::absolute(path).map_err(|e| format!("Invalid path {}: {}", path.display(), e))
}

/// Platform system-file exclusions for a source on `source`'s drive
#[cfg(windows)]
pub fn default_excludes(source: &Path) -> Vec<String> {
    let drive = match source.components().next() {
        Some(std::path::Component::Prefix(prefix)) => prefix.as_os_str().to_string_lossy().into_owned(),
        _ => return Vec::new(),
    };
    WINDOWS_SYSTEM_EXCLUDES
        .iter()
        .map(|name| format!("{}\\{}", drive, name))
        .collect()
}

/// Platform system-file exclusions (none outside Windows)
#[cfg(not(windows))]
pub fn default_excludes(_source: &Path) -> Vec<String> {
    Vec::new()
}
