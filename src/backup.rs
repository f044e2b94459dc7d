//! Backup pipeline
//!
//! One backup run is a three-stage pipeline:
//!
//! ```text
//! walker thread ──bounded channel──▶ N digester workers ──▶ { object store,
//!                                                            manifest writer }
//! ```
//!
//! A single walker traverses every include root in order and feeds absolute
//! regular-file paths to a fixed pool of digester workers over a bounded
//! channel. Each worker hashes its file, admits the content to the object
//! store, and appends the manifest record. The manifest handle is owned by
//! one mutex-guarded writer, so record blocks from different workers never
//! interleave; record *order* across workers is unspecified.
//!
//! Channel close by the walker is the termination signal; the scope join
//! acts as the barrier before the manifest is published. Per-file errors
//! (open, hash, read, blob write) are logged and skipped — the file is then
//! absent from the manifest and no blob is left referenced-but-missing — and
//! the backup as a whole still publishes.

use crate::config::Config;
use crate::digest::ContentDigest;
use crate::error::Result;
use crate::layout::Layout;
use crate::manifest::{self, FileRecord, ManifestWriter};
use crate::store::{InsertOutcome, ObjectStore};
use chrono::{DateTime, Local};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Statistics from one completed backup
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    /// Version number the run published
    pub version: u64,
    /// File records written to the manifest
    pub files_recorded: usize,
    /// New blobs written to the object store
    pub blobs_stored: usize,
    /// Contents that were already present (deduplicated)
    pub blobs_deduplicated: usize,
    /// Files skipped because of per-file errors
    pub files_failed: usize,
}

#[derive(Default)]
struct Counters {
    stored: AtomicUsize,
    deduplicated: AtomicUsize,
    failed: AtomicUsize,
}

/// Run a backup against an initialized, locked repository
///
/// The caller (the repository operation surface) holds the in-use marker
/// and has initialized the layout.
pub(crate) fn run(layout: &Layout, store: &ObjectStore, cfg: &Config) -> Result<BackupOutcome> {
    let version = manifest::allocate_version(layout)?;
    let writer = Mutex::new(ManifestWriter::create(layout, version)?);
    let excludes = normalize_excludes(&cfg.exclude);
    let workers = cfg.workers.max(1);
    let counters = Counters::default();

    info!(
        "backup version {} starting: {} include roots, {} workers",
        version,
        cfg.include.len(),
        workers
    );

    std::thread::scope(|s| {
        let (tx, rx) = bounded::<PathBuf>(workers * 2);

        {
            let include = &cfg.include;
            let excludes = &excludes;
            s.spawn(move || walk_includes(include, excludes, tx));
        }

        for _ in 0..workers {
            let rx = rx.clone();
            let writer = &writer;
            let counters = &counters;
            s.spawn(move || {
                for path in rx {
                    process_file(&path, writer, store, counters);
                }
            });
        }
        drop(rx);
    });

    let writer = writer.into_inner();
    let files_recorded = writer.records();
    writer.publish()?;

    Ok(BackupOutcome {
        version,
        files_recorded,
        blobs_stored: counters.stored.load(Ordering::Relaxed),
        blobs_deduplicated: counters.deduplicated.load(Ordering::Relaxed),
        files_failed: counters.failed.load(Ordering::Relaxed),
    })
}

/// Walk every include root in order, feeding regular files to the workers
///
/// Symlinks are not followed and not recorded; non-regular entries are
/// skipped silently; walk errors are reported and the offending subtree is
/// skipped without aborting the backup.
fn walk_includes(
    include: &[String],
    excludes: &[String],
    tx: crossbeam_channel::Sender<PathBuf>,
) {
    for root in include {
        let iter = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_excluded(e.path(), excludes));

        for entry in iter {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("error walking under {root}: {e}");
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                debug!("skipping symlink {:?}", entry.path());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if tx.send(entry.into_path()).is_err() {
                // All workers are gone; nothing left to feed.
                return;
            }
        }
    }
    // tx drops here and closes the channel, terminating the workers.
}

/// Digest one file, admit its content, and append its manifest record
///
/// The content is admitted to the store *before* the record is written: if
/// the blob write fails, the file is simply absent from this version and
/// the store holds no dangling reference.
fn process_file(
    path: &Path,
    writer: &Mutex<ManifestWriter>,
    store: &ObjectStore,
    counters: &Counters,
) {
    let rendered = match ContentDigest::of_file(path) {
        Ok(digest) => digest.render(),
        Err(e) => {
            warn!("error hashing {:?}: {e}, skipping", path);
            counters.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match store.insert_from_path(path, &rendered) {
        Ok(InsertOutcome::Stored) => {
            counters.stored.fetch_add(1, Ordering::Relaxed);
        }
        Ok(InsertOutcome::Skipped) => {
            counters.deduplicated.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            warn!("error storing {:?}: {e}, skipping", path);
            counters.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }

    let (modified, size_bytes) = stat_info(path);
    let record = FileRecord {
        source: path.to_string_lossy().into_owned(),
        modified,
        size_bytes,
        digest: rendered,
    };
    if let Err(e) = writer.lock().append(&record) {
        warn!("error recording {:?} in manifest: {e}", path);
        counters.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Informational modification time and size; falls back to epoch / 0
fn stat_info(path: &Path) -> (DateTime<Local>, u64) {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| DateTime::<Local>::from(UNIX_EPOCH));
            (modified, meta.len())
        }
        Err(_) => (DateTime::<Local>::from(UNIX_EPOCH), 0),
    }
}

/// Lexically clean a path and fold its case for exclusion matching
///
/// Filename comparison is case-insensitive even on case-sensitive
/// filesystems; this is part of the exclude-entry contract.
pub(crate) fn normalize_for_match(path: &Path) -> String {
    let cleaned: PathBuf = path.components().collect();
    cleaned.to_string_lossy().to_lowercase()
}

fn normalize_excludes(excludes: &[String]) -> Vec<String> {
    excludes
        .iter()
        .map(|e| normalize_for_match(Path::new(e)))
        .filter(|e| !e.is_empty())
        .collect()
}

/// Whether `path` equals a normalized exclude entry or lies under one
///
/// The prefix match requires a path-separator boundary, so an entry `foo`
/// does not exclude `foobar`.
fn is_excluded(path: &Path, excludes: &[String]) -> bool {
    if excludes.is_empty() {
        return false;
    }
    let normalized = normalize_for_match(path);
    excludes.iter().any(|ex| {
        normalized == *ex || normalized.starts_with(&format!("{ex}{MAIN_SEPARATOR}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_exclusion_is_case_insensitive() {
        let excludes = normalize_excludes(&["/data/X".to_string()]);
        assert!(is_excluded(Path::new("/data/x/A.TXT"), &excludes));
        assert!(is_excluded(Path::new("/DATA/X"), &excludes));
        assert!(!is_excluded(Path::new("/data/y/a.txt"), &excludes));
    }

    #[test]
    fn test_exclusion_needs_separator_boundary() {
        let excludes = normalize_excludes(&["/data/foo".to_string()]);
        assert!(is_excluded(Path::new("/data/foo"), &excludes));
        assert!(is_excluded(Path::new("/data/foo/bar"), &excludes));
        assert!(!is_excluded(Path::new("/data/foobar"), &excludes));
    }

    #[test]
    fn test_empty_exclude_entries_ignored() {
        // An empty entry must not turn into a match-everything prefix.
        let excludes = normalize_excludes(&["".to_string()]);
        assert!(excludes.is_empty());
        assert!(!is_excluded(Path::new("/anything"), &excludes));
    }

    #[test]
    fn test_exclude_entry_trailing_separator_cleaned() {
        let excludes = normalize_excludes(&["/data/foo/".to_string()]);
        assert!(is_excluded(Path::new("/data/foo/bar"), &excludes));
    }

    #[test]
    fn test_run_deduplicates_and_publishes() {
        let repo = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("one.txt"), b"same").unwrap();
        fs::write(src.path().join("two.txt"), b"same").unwrap();
        fs::write(src.path().join("three.txt"), b"different").unwrap();

        let layout = Layout::new(repo.path().to_str().unwrap());
        layout.init().unwrap();
        let store = ObjectStore::new(layout.clone(), None);
        let cfg = Config {
            backup_dir: repo.path().to_string_lossy().into_owned(),
            include: vec![src.path().to_string_lossy().into_owned()],
            workers: 4,
            ..Config::default()
        };

        let outcome = run(&layout, &store, &cfg).unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.files_recorded, 3);
        // "same" twice collapses into one blob; a race between workers can
        // only inflate stored+deduplicated, never the blob count on disk.
        assert_eq!(outcome.files_failed, 0);

        let hashes = manifest::read_hashes(&layout.manifest_path(1)).unwrap();
        assert_eq!(hashes.len(), 3);
        let distinct: std::collections::HashSet<_> = hashes.iter().collect();
        assert_eq!(distinct.len(), 2);
        for hash in &distinct {
            assert!(store.contains(hash).unwrap());
        }
    }

    #[test]
    fn test_run_skips_excluded_subtree() {
        let repo = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("keep.txt"), b"keep").unwrap();
        fs::create_dir(src.path().join("skipme")).unwrap();
        fs::write(src.path().join("skipme/drop.txt"), b"drop").unwrap();

        let layout = Layout::new(repo.path().to_str().unwrap());
        layout.init().unwrap();
        let store = ObjectStore::new(layout.clone(), None);
        let cfg = Config {
            backup_dir: repo.path().to_string_lossy().into_owned(),
            include: vec![src.path().to_string_lossy().into_owned()],
            exclude: vec![src
                .path()
                .join("SKIPME")
                .to_string_lossy()
                .into_owned()],
            workers: 2,
            ..Config::default()
        };

        let outcome = run(&layout, &store, &cfg).unwrap();
        assert_eq!(outcome.files_recorded, 1);

        let entries = manifest::read_entries(&layout.manifest_path(1)).unwrap();
        assert!(entries[0].source.ends_with("keep.txt"));
    }
}
