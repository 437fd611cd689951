//! Command-line driver for the versioning engine.
//!
//! Thin by design: argument parsing, config loading and output formatting
//! live here; every operation is a single engine call.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use versioning_engine::{logger, Config, SnapshotOptions, VersioningEngine};

#[derive(Parser, Debug)]
#[command(author, version, about = "Project snapshot and restore", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Projects root (overrides config)
    #[arg(long)]
    projects_root: Option<PathBuf>,

    /// Backups root (overrides config)
    #[arg(long)]
    backups_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a snapshot of one project (archives everything)
    Snapshot { project: String },

    /// List the snapshots of a project, most recent first
    List { project: String },

    /// Restore a project to a prior snapshot
    Restore {
        project: String,
        /// Snapshot id (its timestamp, YYYYMMDD_HHMMSS)
        snapshot_id: String,
    },

    /// Scheduled backup: snapshot one project, or all of them, applying
    /// the configured exclude patterns
    Auto {
        /// Limit to a single project
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logger::init(&args.log_level);

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::with_roots("projects", "backups"),
    };
    if let Some(root) = args.projects_root {
        config.projects_root = root;
    }
    if let Some(root) = args.backups_root {
        config.backups_root = root;
    }

    let engine = VersioningEngine::new(config);

    match args.command {
        Command::Snapshot { project } => {
            let record = engine
                .create_snapshot(&project, SnapshotOptions::interactive())
                .await?;
            println!(
                "Created snapshot {} for '{}' ({} files, {})",
                record.timestamp,
                project,
                record.files_count,
                format_bytes(record.size)
            );
        }
        Command::List { project } => {
            let records = engine.list_snapshots(&project).await?;
            if records.is_empty() {
                println!("No snapshots for '{project}'");
                return Ok(ExitCode::SUCCESS);
            }
            for record in records {
                let mut flags = Vec::new();
                if record.auto_backup {
                    flags.push("auto");
                }
                if record.pre_restore {
                    flags.push("pre-restore");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                println!(
                    "{}  {:>10}  {} files  sha256:{}…{}",
                    record.timestamp,
                    format_bytes(record.size),
                    record.files_count,
                    &record.sha256[..16.min(record.sha256.len())],
                    flags
                );
            }
        }
        Command::Restore {
            project,
            snapshot_id,
        } => {
            engine.restore_snapshot(&project, &snapshot_id).await?;
            println!("Restored '{project}' to snapshot {snapshot_id}");
        }
        Command::Auto { project } => {
            if let Some(project) = project {
                let excludes = engine.config().exclude_patterns.clone();
                let record = engine
                    .create_snapshot(&project, SnapshotOptions::scheduled(excludes))
                    .await?;
                println!(
                    "Backup created for '{}': {} ({} files)",
                    project,
                    format_bytes(record.size),
                    record.files_count
                );
            } else {
                let report = engine.snapshot_all().await?;
                println!(
                    "Backup finished: {}/{} projects saved",
                    report.succeeded, report.total
                );
                for (project, error) in &report.failures {
                    eprintln!("  {project}: {error} ({:?})", error.kind());
                }
                // Partial failure is signalled through the exit code, as
                // cron-driven callers expect.
                if report.failed() > 0 {
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
