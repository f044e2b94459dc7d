//! Repository operation surface
//!
//! [`Repository`] binds a validated configuration to a repository layout and
//! exposes the six operations external callers consume: `backup`, `trim`,
//! `verify`, `fix`, `fix_in_use`, and `restore`, plus version enumeration.
//! Every operation returns a structured result; exiting the process is the
//! CLI's privilege, never the library's.
//!
//! Mutating operations (backup, trim, fix) hold the advisory in-use marker
//! for their duration. The marker is removed only on clean completion — a
//! run that fails midway leaves it behind as the interrupted-state flag, and
//! the operator clears it with [`Repository::fix_in_use`] after inspecting
//! the repository (typically via [`Repository::fix`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use packrat::config::Config;
//! use packrat::repo::Repository;
//!
//! # fn main() -> packrat::error::Result<()> {
//! let cfg = Config::load("config.json")?;
//! let repo = Repository::open(cfg)?;
//!
//! let outcome = repo.backup()?;
//! println!("published version {}", outcome.version);
//!
//! let report = repo.verify(0)?;
//! assert!(report.is_ok());
//! # Ok(())
//! # }
//! ```

use crate::backup::{self, BackupOutcome};
use crate::config::Config;
use crate::crypto;
use crate::error::Result;
use crate::layout::Layout;
use crate::lock;
use crate::manifest;
use crate::restore::{self, RestoreOptions, RestoreOutcome};
use crate::store::ObjectStore;
use crate::trim::{self, FixOutcome, TrimOutcome, TrimSpec};
use crate::verify::{self, VerifyReport};
use std::path::Path;
use tracing::instrument;

/// Handle to one backup repository
#[derive(Debug)]
pub struct Repository {
    cfg: Config,
    layout: Layout,
    key: Option<[u8; crypto::KEY_LEN]>,
}

impl Repository {
    /// Bind a configuration record to its repository
    ///
    /// Validates the record and derives the layout and key material; the
    /// repository itself is only touched by the individual operations.
    pub fn open(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let layout = Layout::new(&cfg.backup_dir);
        let key = crypto::key_from_config(&cfg)?;
        Ok(Repository { cfg, layout, key })
    }

    /// The configuration this repository was opened with
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The derived on-disk layout
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn store(&self) -> ObjectStore {
        ObjectStore::new(self.layout.clone(), self.key)
    }

    /// Published version numbers, ascending
    pub fn versions(&self) -> Result<Vec<u64>> {
        self.layout.require()?;
        manifest::list_versions(&self.layout)
    }

    /// Run a backup and publish a new version
    #[instrument(skip(self))]
    pub fn backup(&self) -> Result<BackupOutcome> {
        self.cfg.validate_for_backup()?;
        self.layout.ensure_root()?;
        let guard = lock::acquire(&self.layout)?;
        self.layout.init()?;
        let outcome = backup::run(&self.layout, &self.store(), &self.cfg)?;
        guard.release()?;
        Ok(outcome)
    }

    /// Trim old versions and garbage-collect unreferenced blobs
    ///
    /// `spec` is either a bare version number (`"3"`: delete everything
    /// strictly below 3) or `+K` (`"+2"`: keep the current maximum plus two
    /// prior versions). A malformed specifier aborts before the repository
    /// is locked or touched.
    #[instrument(skip(self))]
    pub fn trim(&self, spec: &str) -> Result<TrimOutcome> {
        let spec: TrimSpec = spec.parse()?;
        let guard = lock::acquire(&self.layout)?;
        let outcome = trim::run(&self.layout, &self.store(), spec)?;
        guard.release()?;
        Ok(outcome)
    }

    /// Re-hash every blob a version references
    ///
    /// `version` 0 verifies the current maximum. The returned report lists
    /// every bad blob; [`VerifyReport::into_result`] converts a dirty report
    /// into a `VerifyMismatch` error for callers that only need pass/fail.
    #[instrument(skip(self))]
    pub fn verify(&self, version: u64) -> Result<VerifyReport> {
        verify::run(&self.layout, &self.store(), version)
    }

    /// Remove every object-store file not referenced by any manifest
    ///
    /// This is the recovery path after an interrupted backup or trim: it
    /// also collects `.tmp` manifest stragglers and partial blob writes.
    #[instrument(skip(self))]
    pub fn fix(&self) -> Result<FixOutcome> {
        let guard = lock::acquire(&self.layout)?;
        let outcome = trim::fix(&self.layout)?;
        guard.release()?;
        Ok(outcome)
    }

    /// Remove a stale in-use marker left by a crashed run
    #[instrument(skip(self))]
    pub fn fix_in_use(&self) -> Result<()> {
        lock::force_release(&self.layout)
    }

    /// Restore `version` into `target` with default options
    pub fn restore(&self, version: u64, target: &Path) -> Result<RestoreOutcome> {
        self.restore_with_options(version, target, RestoreOptions::default())
    }

    /// Restore `version` into `target`
    #[instrument(skip(self, options))]
    pub fn restore_with_options(
        &self,
        version: u64,
        target: &Path,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome> {
        restore::run(
            &self.layout,
            &self.store(),
            &self.cfg,
            version,
            target,
            options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PackratError;
    use std::fs;
    use tempfile::TempDir;

    fn repo_with_source(contents: &[(&str, &[u8])]) -> (Repository, TempDir, TempDir) {
        let repo_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        for (name, content) in contents {
            let path = src_dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        let cfg = Config {
            backup_dir: repo_dir.path().to_string_lossy().into_owned(),
            include: vec![src_dir.path().to_string_lossy().into_owned()],
            workers: 4,
            ..Config::default()
        };
        (Repository::open(cfg).unwrap(), repo_dir, src_dir)
    }

    #[test]
    fn test_backup_verify_cycle() {
        let (repo, _repo_dir, _src_dir) =
            repo_with_source(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);

        let outcome = repo.backup().unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.files_recorded, 2);
        assert_eq!(repo.versions().unwrap(), vec![1]);

        let report = repo.verify(0).unwrap();
        assert!(report.is_ok());
        // Marker is gone after the clean run.
        assert!(!repo.layout().in_use_marker().exists());
    }

    #[test]
    fn test_busy_repository_rejected_without_side_effects() {
        let (repo, _repo_dir, _src_dir) = repo_with_source(&[("a.txt", b"alpha")]);
        fs::write(repo.layout().in_use_marker(), b"").unwrap();

        assert!(matches!(
            repo.backup(),
            Err(PackratError::RepositoryBusy(_))
        ));
        assert!(!repo.layout().version_dir().exists());
        assert!(!repo.layout().files_dir().exists());

        repo.fix_in_use().unwrap();
        assert!(repo.backup().is_ok());
    }

    #[test]
    fn test_malformed_trim_spec_aborts_before_locking() {
        let (repo, _repo_dir, _src_dir) = repo_with_source(&[("a.txt", b"alpha")]);
        repo.backup().unwrap();

        assert!(matches!(repo.trim("nope"), Err(PackratError::Format(_))));
        assert!(!repo.layout().in_use_marker().exists());
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let cfg = Config {
            backup_dir: String::new(),
            ..Config::default()
        };
        assert!(matches!(
            Repository::open(cfg),
            Err(PackratError::ConfigInvalid(_))
        ));
    }
}
