//! Repository layout and on-disk geometry
//!
//! A repository is a plain directory with a fixed shape:
//!
//! ```text
//! <root>/
//! ├── Version/      # one plaintext manifest per version, named "1", "2", ...
//! ├── Files/        # object store, fanned out over buckets "00".."25"
//! │   ├── 00/
//! │   ├── ...
//! │   └── 25/
//! └── InUse.txt     # advisory single-writer marker
//! ```
//!
//! Exactly 26 fan-out buckets exist because the bucket name is the first two
//! characters of a three-digit-decimal byte rendering, and a byte's leading
//! two digits never exceed "25". The count is a property of the format, not
//! a tuning knob.
//!
//! The layout is a value object built once per operation and threaded
//! through every call; there is no global path state.

use crate::error::{PackratError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Number of fan-out buckets under `Files/`
pub const FANOUT_BUCKETS: u32 = 26;

/// Name of the advisory single-writer marker file
pub const IN_USE_FILE: &str = "InUse.txt";

/// What a filesystem path resolves to, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// A regular file (or symlink; callers that care check separately)
    File,
    /// A directory
    Directory,
    /// Nothing exists at the path
    Absent,
}

/// Probe what exists at `path`
///
/// Returns [`PathKind::Absent`] for a missing path; any other stat failure
/// is a real I/O error and propagates.
pub fn probe(path: &Path) -> Result<PathKind> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(PathKind::Directory),
        Ok(_) => Ok(PathKind::File),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PathKind::Absent),
        Err(e) => Err(e.into()),
    }
}

/// Derived paths of one repository
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    version_dir: PathBuf,
    files_dir: PathBuf,
    in_use_marker: PathBuf,
}

impl Layout {
    /// Derive the repository layout from a configured root path
    ///
    /// Trailing path separators on the root are stripped first.
    pub fn new(backup_dir: &str) -> Self {
        let trimmed = backup_dir.trim_end_matches(['/', '\\']);
        let root = PathBuf::from(trimmed);
        Layout {
            version_dir: root.join("Version"),
            files_dir: root.join("Files"),
            in_use_marker: root.join(IN_USE_FILE),
            root,
        }
    }

    /// Repository root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding version manifests
    pub fn version_dir(&self) -> &Path {
        &self.version_dir
    }

    /// Directory holding the object store
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Path of the advisory in-use marker
    pub fn in_use_marker(&self) -> &Path {
        &self.in_use_marker
    }

    /// Create the repository root if it does not exist yet
    ///
    /// The marker file lives directly under the root, so the root must exist
    /// before a mutating operation can even take the lock.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Create the version directory, the files directory, and all 26 fan-out
    /// buckets. Idempotent across repeated backup runs.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.version_dir)?;
        fs::create_dir_all(&self.files_dir)?;
        for i in 0..FANOUT_BUCKETS {
            fs::create_dir_all(self.files_dir.join(format!("{:02}", i)))?;
        }
        debug!("initialized repository layout at {:?}", self.root);
        Ok(())
    }

    /// Require that an initialized repository exists here
    ///
    /// Trim, fix, verify, and restore refuse to run against a root where
    /// either subdirectory is missing.
    pub fn require(&self) -> Result<()> {
        for dir in [&self.version_dir, &self.files_dir] {
            match probe(dir)? {
                PathKind::Directory => {}
                _ => return Err(PackratError::LayoutMissing(dir.clone())),
            }
        }
        Ok(())
    }

    /// Path of the manifest for `version`
    pub fn manifest_path(&self, version: u64) -> PathBuf {
        self.version_dir.join(version.to_string())
    }

    /// Path of the blob named by a rendered digest
    ///
    /// The bucket is the first two characters of the rendering.
    pub fn blob_path(&self, rendered: &str) -> PathBuf {
        self.files_dir.join(crate::digest::bucket(rendered)).join(rendered)
    }
}
