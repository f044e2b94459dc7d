//! # Packrat CLI
//!
//! Thin command-line front end over the packrat library: it loads the
//! configuration file, maps each subcommand onto one repository operation,
//! and maps the outcome onto the exit code. The process exits 0 on success
//! and 1 on any runtime error; help and version output are clap's business.
//!
//! ```bash
//! # Publish a new version of everything the config includes
//! packrat backup -c config.json
//!
//! # Keep the current version plus two prior ones
//! packrat trim +2
//!
//! # Re-hash the latest version's blobs
//! packrat verify
//!
//! # Restore version 3, preserving directory structure
//! packrat restore 3 /tmp/restored --tree
//! ```

use clap::{Parser, Subcommand};
use packrat::{Config, Repository, RestoreOptions, RestorePaths};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Content-addressed, versioned file backups
#[derive(Parser)]
#[command(name = "packrat")]
#[command(version)]
#[command(about = "Deduplicating, versioned file backups with verify and resumable restore")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up the configured include paths as a new version
    Backup,

    /// Delete old versions and garbage-collect unreferenced content
    Trim {
        /// Bare version ("3": delete below 3) or "+K" (keep current plus K)
        spec: String,
    },

    /// Re-hash the stored content of a version
    Verify {
        /// Version to verify; 0 means the current maximum
        #[arg(default_value_t = 0)]
        version: u64,
    },

    /// List the published versions
    List,

    /// Remove object-store files that no manifest references
    Fix,

    /// Remove a stale in-use marker left by a crashed run
    Fixinuse,

    /// Restore a version into a target directory
    Restore {
        /// Version to restore
        version: u64,
        /// Directory to restore into
        target: PathBuf,
        /// Preserve directory structure relative to the common source
        /// prefix instead of the flat historical layout
        #[arg(long)]
        tree: bool,
    },

    /// Write an example configuration file
    Exampleconfig {
        /// Where to write the example
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> packrat::Result<()> {
    // The example-config command writes a template and needs no existing
    // configuration to load.
    if let Commands::Exampleconfig { path } = &cli.command {
        Config::write_example(path)?;
        println!("wrote example configuration to {}", path.display());
        return Ok(());
    }

    let cfg = Config::load(&cli.config)?;
    let repo = Repository::open(cfg)?;

    match cli.command {
        Commands::Backup => {
            let outcome = repo.backup()?;
            println!(
                "published version {}: {} files, {} new blobs, {} deduplicated, {} skipped",
                outcome.version,
                outcome.files_recorded,
                outcome.blobs_stored,
                outcome.blobs_deduplicated,
                outcome.files_failed,
            );
        }
        Commands::Trim { spec } => {
            let outcome = repo.trim(&spec)?;
            println!(
                "trimmed to version {}: removed {} manifests and {} blobs",
                outcome.cutoff, outcome.manifests_removed, outcome.blobs_removed,
            );
        }
        Commands::Verify { version } => {
            let report = repo.verify(version)?;
            for failure in &report.failures {
                eprintln!("bad blob {}: {}", failure.digest, failure.reason);
            }
            let report = report.into_result()?;
            println!(
                "version {} verified: {} blobs clean",
                report.version, report.checked
            );
        }
        Commands::List => {
            for version in repo.versions()? {
                println!("{version}");
            }
        }
        Commands::Fix => {
            let outcome = repo.fix()?;
            println!(
                "fix complete: removed {} orphans, kept {} blobs",
                outcome.blobs_removed, outcome.blobs_kept,
            );
        }
        Commands::Fixinuse => {
            repo.fix_in_use()?;
            println!("removed in-use marker");
        }
        Commands::Restore {
            version,
            target,
            tree,
        } => {
            let options = RestoreOptions {
                paths: if tree {
                    RestorePaths::CommonPrefix
                } else {
                    RestorePaths::Legacy
                },
            };
            let outcome = repo.restore_with_options(version, &target, options)?;
            println!(
                "restored version {} into {}: {} files ({} skipped){}",
                outcome.version,
                target.display(),
                outcome.files_extracted,
                outcome.files_skipped,
                if outcome.resumed { " [resumed]" } else { "" },
            );
        }
        Commands::Exampleconfig { .. } => unreachable!("handled above"),
    }

    Ok(())
}
