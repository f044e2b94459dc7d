//! Two-phase resumable restore
//!
//! Restore materializes one version into a target directory in two phases,
//! checkpointing progress to `restore_state.json` in the target after every
//! file so a killed restore can be re-run and pick up where it stopped:
//!
//! ```text
//! ┌─────────┐  all blobs staged   ┌────────────┐  all files written   ┌───────────┐
//! │ copying │────────────────────▶│ extracting │─────────────────────▶│ completed │
//! └─────────┘                     └────────────┘                      └───────────┘
//!      ▲ ▲                            ▲ ▲
//!      └─┴── crash/restart resumes ───┴─┘
//! ```
//!
//! Phase 1 copies each referenced blob, still compressed (and sealed), from
//! the object store into the staging directory under its digest name. Phase
//! 2 decodes each staged blob into its final location. The staging directory
//! defaults to the restore target; a separate staging directory keeps the
//! (possibly slow) store reads off the target volume.
//!
//! Re-running is always safe: work already journaled in the state file is
//! skipped, and re-extracting a file writes the same bytes again.

use crate::config::Config;
use crate::digest;
use crate::error::{PackratError, Result};
use crate::layout::{self, Layout, PathKind};
use crate::manifest::{self, format_timestamp, ManifestEntry};
use crate::store::ObjectStore;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the on-disk restore journal, kept in the restore target
pub const STATE_FILE: &str = "restore_state.json";

/// Phase of a restore in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePhase {
    /// Blobs are being copied into the staging directory
    Copying,
    /// Staged blobs are being decoded into final locations
    Extracting,
    /// Everything is written; only cleanup remains
    Completed,
}

/// On-disk restore journal
///
/// This document is an explicit contract: a restore interrupted by one
/// process can be finished by another, as long as the same target directory
/// and key material are used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreState {
    /// Version being restored
    pub version: u64,
    /// Repository root the restore reads from
    pub backup_dir: String,
    /// Final destination directory
    pub restore_dir: String,
    /// Staging directory (equals `restore_dir` unless configured otherwise)
    pub stage_dir: String,
    /// Whether blobs are expected to be encrypted
    pub encrypted: bool,
    /// Digests already present in the staging directory
    #[serde(default)]
    pub copied_files: Vec<String>,
    /// Recorded source paths already written to the target
    #[serde(default)]
    pub extracted_files: Vec<String>,
    /// Current phase
    pub phase: RestorePhase,
    /// When this restore first started
    pub start_time: String,
    /// When the journal was last rewritten
    #[serde(default)]
    pub last_update: String,
}

impl RestoreState {
    /// Load a journal from disk
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Rewrite the journal atomically (temp file, then rename)
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_update = format_timestamp(Local::now());
        let data = serde_json::to_string_pretty(self)?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, data)?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}

/// How restored files are laid out under the target directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestorePaths {
    /// Historical behavior: basename only, except that a recorded path
    /// containing a `subdir` segment keeps its last two components. Kept as
    /// the default for compatibility with repositories written by earlier
    /// releases; it flattens nested trees.
    #[default]
    Legacy,
    /// Reconstruct paths relative to the longest common directory prefix of
    /// the manifest's recorded paths, preserving nested structure.
    CommonPrefix,
}

/// Options for a restore run
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Path layout under the target directory
    pub paths: RestorePaths,
}

/// Statistics from one restore run
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Version that was restored
    pub version: u64,
    /// Total files written to the target (including prior interrupted runs)
    pub files_extracted: usize,
    /// Manifest entries that could not be staged or extracted
    pub files_skipped: usize,
    /// Whether an existing journal was resumed
    pub resumed: bool,
}

/// Restore `version` into `target`
pub(crate) fn run(
    layout: &Layout,
    store: &ObjectStore,
    cfg: &Config,
    version: u64,
    target: &Path,
    options: RestoreOptions,
) -> Result<RestoreOutcome> {
    layout.require()?;
    let manifest_path = layout.manifest_path(version);
    if layout::probe(&manifest_path)? != PathKind::File {
        return Err(PackratError::VersionNotFound(version));
    }

    fs::create_dir_all(target)?;
    let state_path = target.join(STATE_FILE);

    let mut resumed = false;
    let mut state = match layout::probe(&state_path)? {
        PathKind::File => match RestoreState::load(&state_path) {
            Ok(state) if state.version != version => {
                warn!(
                    "restore state in {:?} is for version {}, not {version}; starting fresh",
                    target, state.version
                );
                fresh_state(layout, store, cfg, version, target)
            }
            Ok(state) => {
                info!(
                    "resuming restore of version {} (phase {:?}, {} staged, {} extracted)",
                    state.version,
                    state.phase,
                    state.copied_files.len(),
                    state.extracted_files.len()
                );
                resumed = true;
                state
            }
            Err(e) => {
                warn!("could not load restore state, starting fresh: {e}");
                fresh_state(layout, store, cfg, version, target)
            }
        },
        _ => fresh_state(layout, store, cfg, version, target),
    };

    let stage = PathBuf::from(&state.stage_dir);
    if stage != target {
        fs::create_dir_all(&stage)?;
        info!("staging through {:?}", stage);
    }
    checkpoint(&mut state, &state_path);

    let entries = manifest::read_entries(&manifest_path)?;
    let mut skipped = 0;

    if state.phase == RestorePhase::Copying {
        skipped += stage_blobs(store, &entries, &stage, &mut state, &state_path);
        state.phase = RestorePhase::Extracting;
        checkpoint(&mut state, &state_path);
    }

    if state.phase == RestorePhase::Extracting {
        if state.encrypted && !store.is_encrypting() {
            return Err(PackratError::crypto(
                "repository content is encrypted but no key is configured",
            ));
        }
        skipped += extract_files(
            store,
            &entries,
            &stage,
            target,
            options.paths,
            &mut state,
            &state_path,
        )?;
        state.phase = RestorePhase::Completed;
        checkpoint(&mut state, &state_path);
    }

    let files_extracted = state.extracted_files.len();
    info!(
        "restore of version {version} complete: {files_extracted} files, {skipped} skipped"
    );

    cleanup(&state, &stage, target, &state_path);

    Ok(RestoreOutcome {
        version,
        files_extracted,
        files_skipped: skipped,
        resumed,
    })
}

fn fresh_state(
    layout: &Layout,
    store: &ObjectStore,
    cfg: &Config,
    version: u64,
    target: &Path,
) -> RestoreState {
    let stage_dir = cfg
        .restore_stage_dir
        .clone()
        .unwrap_or_else(|| target.to_string_lossy().into_owned());
    RestoreState {
        version,
        backup_dir: layout.root().to_string_lossy().into_owned(),
        restore_dir: target.to_string_lossy().into_owned(),
        stage_dir,
        encrypted: store.is_encrypting(),
        copied_files: Vec::new(),
        extracted_files: Vec::new(),
        phase: RestorePhase::Copying,
        start_time: format_timestamp(Local::now()),
        last_update: String::new(),
    }
}

/// Journal write failures must not kill a restore that is otherwise making
/// progress; the cost is only re-doing work after a crash.
fn checkpoint(state: &mut RestoreState, state_path: &Path) {
    if let Err(e) = state.save(state_path) {
        warn!("could not save restore state: {e}");
    }
}

/// Phase 1: copy every referenced blob into the staging directory
fn stage_blobs(
    store: &ObjectStore,
    entries: &[ManifestEntry],
    stage: &Path,
    state: &mut RestoreState,
    state_path: &Path,
) -> usize {
    let mut copied: HashSet<String> = state.copied_files.iter().cloned().collect();
    let mut skipped = 0;

    for entry in entries {
        if copied.contains(&entry.digest) {
            continue;
        }
        if !digest::is_valid_rendered(&entry.digest) {
            warn!("malformed hash {:?} for {:?}, skipping", entry.digest, entry.source);
            skipped += 1;
            continue;
        }

        let blob = store.blob_path(&entry.digest);
        let staged = stage.join(&entry.digest);
        debug!("staging {:?}", entry.source);
        match fs::copy(&blob, &staged) {
            Ok(_) => {
                copied.insert(entry.digest.clone());
                state.copied_files.push(entry.digest.clone());
                checkpoint(state, state_path);
            }
            Err(e) => {
                warn!("could not stage blob for {:?}: {e}", entry.source);
                skipped += 1;
            }
        }
    }
    skipped
}

/// Phase 2: decode staged blobs into their final locations
fn extract_files(
    store: &ObjectStore,
    entries: &[ManifestEntry],
    stage: &Path,
    target: &Path,
    paths: RestorePaths,
    state: &mut RestoreState,
    state_path: &Path,
) -> Result<usize> {
    let relative = compute_relative_paths(entries, paths);
    let mut extracted: HashSet<String> = state.extracted_files.iter().cloned().collect();
    let mut skipped = 0;

    for (entry, rel) in entries.iter().zip(&relative) {
        if extracted.contains(&entry.source) {
            continue;
        }

        let staged = stage.join(&entry.digest);
        let dest = target.join(rel);
        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("could not create {:?}: {e}", parent);
                skipped += 1;
                continue;
            }
        }

        debug!("extracting {:?} -> {:?}", entry.source, dest);
        match store.decode_to_file(&staged, &dest) {
            Ok(()) => {
                extracted.insert(entry.source.clone());
                state.extracted_files.push(entry.source.clone());
                checkpoint(state, state_path);
            }
            // Missing or wrong key material poisons every file the same
            // way; aborting beats writing a target full of garbage.
            Err(e @ PackratError::Crypto(_)) => return Err(e),
            Err(e) => {
                warn!("could not extract {:?}: {e}", entry.source);
                skipped += 1;
            }
        }
    }
    Ok(skipped)
}

fn cleanup(state: &RestoreState, stage: &Path, target: &Path, state_path: &Path) {
    for digest in &state.copied_files {
        let staged = stage.join(digest);
        if let Err(e) = fs::remove_file(&staged) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not remove staged blob {:?}: {e}", staged);
            }
        }
    }
    if let Err(e) = fs::remove_file(state_path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("could not remove restore state {:?}: {e}", state_path);
        }
    }
    if stage != target {
        // Deliberately not remove_dir_all: an unrelated file in a shared
        // staging directory must survive.
        let _ = fs::remove_dir(stage);
    }
}

fn split_components(source: &str) -> Vec<&str> {
    source
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

/// Historical relative-path derivation
///
/// Basename only — unless the recorded path contains a `subdir` segment, in
/// which case the last two components survive. Nested trees flatten; that
/// is the compatibility contract, not an accident of this implementation.
pub(crate) fn legacy_relative(source: &str) -> PathBuf {
    let parts = split_components(source);
    let has_subdir = source.contains("\\subdir\\") || source.contains("/subdir/");
    if has_subdir && parts.len() >= 2 {
        return PathBuf::from(parts[parts.len() - 2]).join(parts[parts.len() - 1]);
    }
    PathBuf::from(parts.last().copied().unwrap_or_default())
}

fn compute_relative_paths(entries: &[ManifestEntry], mode: RestorePaths) -> Vec<PathBuf> {
    match mode {
        RestorePaths::Legacy => entries
            .iter()
            .map(|e| legacy_relative(&e.source))
            .collect(),
        RestorePaths::CommonPrefix => {
            let split: Vec<Vec<&str>> = entries
                .iter()
                .map(|e| split_components(&e.source))
                .collect();
            let prefix = common_prefix_len(&split);
            split
                .iter()
                .map(|parts| parts[prefix.min(parts.len().saturating_sub(1))..].iter().collect())
                .collect()
        }
    }
}

/// Longest shared leading component count, capped so every entry keeps at
/// least its filename
fn common_prefix_len(split: &[Vec<&str>]) -> usize {
    let Some(first) = split.first() else {
        return 0;
    };
    let cap = split
        .iter()
        .map(|parts| parts.len().saturating_sub(1))
        .min()
        .unwrap_or(0);
    let mut len = 0;
    while len < cap && split.iter().all(|parts| parts[len] == first[len]) {
        len += 1;
    }
    len
}
