//! Error types for drive-replica
//!
//! This module defines the error types shared by the scan, copy and replay
//! phases, plus the per-path failure record that every phase aggregates
//! instead of aborting sibling work.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for replication operations
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Session log parsing/writing error
    #[error("Session error: {0}")]
    SessionError(String),

    /// A startup check refused to run the replication
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Operation cancelled by user
    #[error("Operation cancelled")]
    Cancelled,

    /// One or more paths failed during a copy batch
    #[error("{count} path(s) failed to copy")]
    CopyFailures {
        count: usize,
        failures: Vec<PathFailure>,
    },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ReplicaError>,
    },
}

impl ReplicaError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a session log error
    pub fn session(message: impl Into<String>) -> Self {
        Self::SessionError(message.into())
    }

    /// Check if this error is a permission issue
    pub fn is_permission_error(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
            Self::WithContext { source, .. } => source.is_permission_error(),
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for replication operations
pub type Result<T> = std::result::Result<T, ReplicaError>;

impl From<std::io::Error> for ReplicaError {
    fn from(err: std::io::Error) -> Self {
        ReplicaError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for ReplicaError {
    fn from(err: serde_json::Error) -> Self {
        ReplicaError::SessionError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| ReplicaError::io(path, e))
    }
}

/// A single path that failed during copy or replay, with its cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFailure {
    /// Source-side path the failure belongs to
    pub path: String,
    /// Rendered cause
    pub message: String,
}

impl PathFailure {
    /// Record a failure for `path`
    pub fn new(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for PathFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.path, self.message)
    }
}

/// Turn a list of per-path failures into a `CopyFailures` error, if any
pub fn collect_failures(failures: Vec<PathFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ReplicaError::CopyFailures {
            count: failures.len(),
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ReplicaError::io("/test/path", io_err);
        assert_eq!(err.path().unwrap(), &PathBuf::from("/test/path"));
        assert!(!err.is_permission_error());
    }

    #[test]
    fn test_context_keeps_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ReplicaError::io("/x", io_err).with_context("opening session");
        assert!(err.is_permission_error());
        assert_eq!(err.path().unwrap(), &PathBuf::from("/x"));
        assert!(err.to_string().starts_with("opening session"));
    }

    #[test]
    fn test_collect_failures() {
        assert!(collect_failures(Vec::new()).is_ok());

        let failures = vec![
            PathFailure::new("/src/a", "exists"),
            PathFailure::new("/src/b", "denied"),
        ];
        match collect_failures(failures) {
            Err(ReplicaError::CopyFailures { count, failures }) => {
                assert_eq!(count, 2);
                assert_eq!(failures[0].to_string(), "/src/a - exists");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
