//! Logging setup
//!
//! `RUST_LOG` wins when set. Otherwise the level follows `-q`/`-v`:
//! quiet shows errors only, the default shows warnings, and each `-v`
//! steps up through info, debug and trace. An optional log file receives
//! the same events without ANSI colors through a non-blocking writer.

use crate::error::{ReplicaError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Level directive for the given verbosity flags
pub fn level_for(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the log file when dropped; keep it alive for
/// the whole run.
pub fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbose, quiet)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| ReplicaError::config(format!("Invalid log file {}", path.display())))?;
            std::fs::create_dir_all(dir).map_err(|e| ReplicaError::io(dir, e))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ReplicaError::config(format!("Cannot install logger: {}", e)))?;

    Ok(guard)
}
