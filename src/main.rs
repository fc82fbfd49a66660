//! drive-replica CLI - resumable drive and folder replication
//!
//! Scans the source, copies it to the destination and replays the
//! metadata a plain copy loses. Ctrl+C stops at the next path; running
//! again resumes from the session file.

use clap::Parser;
use console::Term;
use drive_replica::config::{CliArgs, Commands, ReplicaConfig};
use drive_replica::core::Replicator;
use drive_replica::error::{ReplicaError, Result};
use drive_replica::fs::is_dir_empty;
use drive_replica::logging::init_logging;
use drive_replica::progress::ProgressReporter;
use drive_replica::sync::{Session, SessionLog};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code after an interrupted run
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Keep the guard alive so the log file is flushed on exit
    let _guard = match init_logging(args.verbose, args.quiet, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(ReplicaError::Cancelled) => {
            eprintln!("Interrupted before the copy started.");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_permission_error() {
                if let Some(path) = e.path() {
                    eprintln!("Access to {} was denied; run with elevated rights", path.display());
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<ExitCode> {
    // Handle subcommands
    if let Some(command) = &args.command {
        return handle_command(command, &args);
    }

    let log = SessionLog::new(&args.session);
    let cancelled = install_interrupt_handler()?;

    if !args.fresh && log.exists_nonempty() {
        match log.load() {
            Ok(session) => {
                if args.resume
                    || confirm(
                        &format!(
                            "Unfinished session {} -> {} ({} paths copied). Resume?",
                            session.header.source,
                            session.header.destination,
                            session.copied.len()
                        ),
                        args.yes,
                    )?
                {
                    return resume(&args, &log, session, cancelled);
                }
            }
            Err(e) if args.resume => {
                return Err(e.with_context(format!("Cannot resume {}", log.path().display())));
            }
            Err(e) => warn!("Ignoring unreadable session {}: {}", log.path().display(), e),
        }
    } else if args.resume {
        return Err(ReplicaError::session(format!(
            "No session to resume at {}",
            log.path().display()
        )));
    }

    // Require source and destination for a fresh run
    if args.source.is_none() || args.destination.is_none() {
        eprintln!("Usage: drive-replica <SOURCE> <DESTINATION> [EXCLUDE]... [OPTIONS]");
        eprintln!("       drive-replica --help for more information");
        eprintln!("       drive-replica status  - Inspect the session file");
        return Ok(ExitCode::FAILURE);
    }

    // Build configuration
    let config = ReplicaConfig::from_cli(&args).map_err(ReplicaError::ConfigError)?;
    check_preconditions(&config, args.yes)?;

    if !args.quiet {
        print_config(&config);
    }
    if !confirm("Start scanning?", args.yes)? {
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let replicator = Replicator::new(config)
        .with_progress(progress_for(&args))
        .with_cancellation(cancelled);
    let scan = replicator.prepare()?;

    if !args.quiet {
        println!();
        scan.print_summary();
        println!();
    }
    let prompt = format!(
        "Copy {} files ({})?",
        scan.inventory.file_count(),
        humansize::format_size(scan.inventory.total_size, humansize::BINARY)
    );
    if !confirm(&prompt, args.yes)? {
        println!("Aborted. Run again to resume from {}", replicator.session().path().display());
        return Ok(ExitCode::SUCCESS);
    }

    let result = replicator.run(&scan)?;
    Ok(finish(&args, &result, &replicator))
}

fn resume(args: &CliArgs, log: &SessionLog, session: Session, cancelled: Arc<AtomicBool>) -> Result<ExitCode> {
    let config = ReplicaConfig::from_session(&session.header, log.path());
    info!("Resuming session {}", log.path().display());
    if !args.quiet {
        print_config(&config);
    }

    let replicator = Replicator::new(config)
        .with_progress(progress_for(args))
        .with_cancellation(cancelled);
    let result = replicator.resume(&session)?;
    Ok(finish(args, &result, &replicator))
}

fn finish(args: &CliArgs, result: &drive_replica::core::ReplicationResult, replicator: &Replicator) -> ExitCode {
    let log = replicator.session();
    if !args.quiet {
        result.print_summary();
    }

    if result.is_cancelled() {
        if !args.quiet {
            println!();
            replicator.progress().summary().print();
        }
        eprintln!("Interrupted. Run again to resume from {}", log.path().display());
        return ExitCode::from(EXIT_INTERRUPTED);
    }
    if !result.is_success() {
        eprintln!("Failed paths were written to {}", log.error_path().display());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn handle_command(command: &Commands, args: &CliArgs) -> Result<ExitCode> {
    match command {
        Commands::Status { session } => {
            cmd_status(session.as_deref().unwrap_or(&args.session))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_status(session_path: &Path) -> Result<()> {
    let log = SessionLog::new(session_path);
    let session = log.load()?;
    let inv = &session.inventory;

    println!("=== Session {} ===", session_path.display());
    println!("Source:      {}", session.header.source);
    println!("Destination: {}", session.header.destination);
    println!("Exclude:     {:?}", session.header.exclude);
    println!("Dirs:        {}", inv.dir_count());
    println!("Files:       {}", inv.file_count());
    println!("Links:       {}", inv.link_count());
    println!("Size:        {}", humansize::format_size(inv.total_size, humansize::BINARY));
    println!("Hardlinks:   {} groups", inv.hardlinks.len());
    println!("Junctions:   {}", inv.junctions.len());
    println!("Attributes:  {} directories", inv.attributed_dirs.len());

    let known = inv.known_paths();
    let done = session.copied_set().iter().filter(|p| known.contains(*p)).count();
    println!("Copied:      {}/{} paths", done, known.len());

    println!("\nRecent entries:");
    for path in session.copied.iter().rev().take(10) {
        println!("  {}", path);
    }

    let runs = log.read_errors()?;
    if !runs.is_empty() {
        println!("\nError runs ({}), latest:", runs.len());
        if let Some(latest) = runs.last() {
            for path in latest.iter().take(10) {
                println!("  {}", path);
            }
            if latest.len() > 10 {
                println!("  ... and {} more", latest.len() - 10);
            }
        }
    }

    Ok(())
}

fn check_preconditions(config: &ReplicaConfig, assume_yes: bool) -> Result<()> {
    config.check_destination()?;

    if config.destination.exists() {
        let empty = is_dir_empty(&config.destination).map_err(|e| ReplicaError::io(&config.destination, e))?;
        if !empty {
            let prompt = format!("{} is not empty. Merge into it?", config.destination.display());
            if !confirm(&prompt, assume_yes)? {
                return Err(ReplicaError::Precondition("destination not empty".to_string()));
            }
        }
    }
    Ok(())
}

fn progress_for(args: &CliArgs) -> Arc<ProgressReporter> {
    if args.quiet || args.no_progress {
        Arc::new(ProgressReporter::disabled())
    } else {
        Arc::new(ProgressReporter::new())
    }
}

/// First Ctrl+C sets the flag; a second one exits immediately
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    use signal_hook::consts::SIGINT;

    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register_conditional_shutdown(SIGINT, i32::from(EXIT_INTERRUPTED), Arc::clone(&flag))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&flag))?;
    Ok(flag)
}

fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let term = Term::stderr();
    term.write_str(&format!("{} [y/N] ", prompt))?;
    let answer = term.read_line()?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_config(config: &ReplicaConfig) {
    println!("=== Configuration ===");
    println!("Source:      {}", config.source.display());
    println!("Destination: {}", config.destination.display());
    println!("Session:     {}", config.session.display());
    println!("Exclude:     {:?}", config.effective_excludes());
    println!("Merge:       {}", config.merge_existing);
    println!();
}
