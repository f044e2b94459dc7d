//! # Packrat - Content-addressed, versioned file backups
//!
//! A backup engine built on the object-store model of a source-control
//! system: every unique file content is stored exactly once, and every
//! backup run publishes a plaintext *version manifest* listing the captured
//! files together with the content digests that index them.
//!
//! ## Overview
//!
//! Packrat writes an append-only repository with three parts:
//!
//! - **Object store** (`Files/`): one gzip-compressed (optionally
//!   AES-256-GCM encrypted) blob per unique content, named by the SHA-1 of
//!   the original bytes and fanned out over 26 bucket directories
//! - **Version manifests** (`Version/`): one CR-LF plaintext file per
//!   backup run, published atomically by temp-then-rename; manifests are
//!   the single source of truth for which blobs are live
//! - **In-use marker** (`InUse.txt`): advisory single-writer lock that
//!   doubles as the interrupted-operation flag
//!
//! On top of that sit six operations: backup, trim (delete old versions and
//! garbage-collect the blobs only they referenced), verify (re-hash stored
//! content to catch bit-rot), fix (reconcile the store against all
//! surviving manifests), fixinuse (clear a stale marker), and a two-phase
//! crash-resumable restore.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use packrat::config::Config;
//! use packrat::repo::Repository;
//! use std::path::Path;
//!
//! # fn main() -> packrat::error::Result<()> {
//! let cfg = Config {
//!     backup_dir: "/var/backups/repo".to_string(),
//!     include: vec!["/home/user/documents".to_string()],
//!     exclude: vec!["/home/user/documents/cache".to_string()],
//!     ..Config::default()
//! };
//!
//! let repo = Repository::open(cfg)?;
//!
//! // Publish a new version.
//! let outcome = repo.backup()?;
//! println!("version {} ({} files)", outcome.version, outcome.files_recorded);
//!
//! // Keep the current version plus two prior ones.
//! repo.trim("+2")?;
//!
//! // Verify the latest version and restore it elsewhere.
//! repo.verify(0)?.into_result()?;
//! repo.restore(outcome.version, Path::new("/tmp/restored"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Deduplication
//!
//! Files are addressed by the SHA-1 of their raw bytes, rendered in an
//! unusual but load-bearing way: three zero-padded decimal digits per byte,
//! 60 characters total. Identical contents collapse into one blob no matter
//! how many paths or versions reference them; a backup run that sees a
//! known digest skips the copy entirely.
//!
//! ## Concurrency
//!
//! A backup runs one walker thread feeding a fixed pool of digester workers
//! over a bounded channel; a single mutex-guarded writer serializes
//! manifest records. All other operations are single-threaded. Across
//! processes, the in-use marker enforces one mutating operation per
//! repository at a time.
//!
//! ## Error Handling
//!
//! All operations return [`error::Result`]. Whole-operation preconditions
//! (busy repository, missing layout, malformed input) fail fast; per-file
//! problems during backup, trim, fix, and restore are logged via `tracing`
//! and skipped so one unreadable file cannot hold the rest hostage.

// Public API modules
pub mod backup;
pub mod config;
pub mod crypto;
pub mod digest;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod repo;
pub mod restore;
pub mod store;
pub mod trim;
pub mod verify;

// Internal modules (not part of the public API)
mod lock;

// Re-export the main types for convenience
pub use backup::BackupOutcome;
pub use config::Config;
pub use error::{PackratError, Result};
pub use repo::Repository;
pub use restore::{RestoreOptions, RestoreOutcome, RestorePaths, RestorePhase, RestoreState};
pub use trim::{FixOutcome, TrimOutcome, TrimSpec};
pub use verify::{VerifyFailure, VerifyReport};
