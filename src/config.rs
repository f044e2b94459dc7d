//! Backup configuration record
//!
//! The configuration record is the boundary between the engine and whatever
//! produced it (CLI flags, a config file, another program). It is consumed
//! fully populated; the engine only validates it. The on-disk representation
//! is JSON with camelCase keys, compatible with configuration files written
//! by earlier releases.
//!
//! ## Example
//!
//! ```rust,no_run
//! use packrat::config::Config;
//!
//! # fn main() -> packrat::error::Result<()> {
//! let mut cfg = Config::load("config.json")?;
//! cfg.exclude.push("/home/user/tmp".to_string());
//! cfg.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{PackratError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default number of digester workers in the backup pipeline
pub const DEFAULT_WORKERS: usize = 20;

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// Populated backup configuration
///
/// `backup_dir` names the repository root; `include` and `exclude` control
/// the walk; the two `encrypt_*` fields select optional blob encryption
/// (at most one may be set); `restore_stage_dir` redirects restore staging
/// away from the restore target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Repository root directory (trailing separators are stripped)
    pub backup_dir: String,
    /// Source paths to walk; each may be a directory or a regular file
    #[serde(default)]
    pub include: Vec<String>,
    /// Prefix-exclusion entries; compared case-insensitively after cleaning
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Derive the encryption key as SHA-256 of this password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt_password: Option<String>,
    /// Derive the encryption key from the first 32 bytes of this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt_key_file: Option<String>,
    /// Staging directory for restore; defaults to the restore target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_stage_dir: Option<String>,
    /// Number of digester workers for backup (default 20)
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backup_dir: String::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            encrypt_password: None,
            encrypt_key_file: None,
            restore_stage_dir: None,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl Config {
    /// Read a configuration record from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }

    /// Write this configuration record to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), data)?;
        Ok(())
    }

    /// Write a filled-in example configuration to `path`
    pub fn write_example(path: impl AsRef<Path>) -> Result<()> {
        let example = Config {
            backup_dir: "/var/backups/repo".to_string(),
            include: vec!["/home".to_string(), "/etc".to_string()],
            exclude: vec!["/home/nobody".to_string()],
            workers: DEFAULT_WORKERS,
            ..Config::default()
        };
        example.save(path)
    }

    /// Validate the fields every operation depends on
    ///
    /// Checks that the repository root is named and that at most one
    /// encryption source is configured.
    pub fn validate(&self) -> Result<()> {
        if self.backup_dir.trim().is_empty() {
            return Err(PackratError::config("backupDir is required"));
        }
        if self.encrypt_password.is_some() && self.encrypt_key_file.is_some() {
            return Err(PackratError::config(
                "encryptPassword and encryptKeyFile are mutually exclusive",
            ));
        }
        if self.workers == 0 {
            return Err(PackratError::config("workers must be at least 1"));
        }
        Ok(())
    }

    /// Additional validation for the backup operation
    pub fn validate_for_backup(&self) -> Result<()> {
        self.validate()?;
        if self.include.is_empty() {
            return Err(PackratError::config(
                "at least one include path is required",
            ));
        }
        Ok(())
    }
}
