//! Version manifests
//!
//! A manifest is the plaintext record of one backup version and the single
//! source of truth for which blobs are live. It is written to
//! `Version/<v>.tmp` while the backup runs and published by an atomic rename
//! to `Version/<v>`; a manifest that still carries the `.tmp` suffix is a
//! straggler from an interrupted run and is deleted by the next mutating
//! operation.
//!
//! Record grammar (lines are CR-LF terminated, fields `NAME:value`):
//!
//! ```text
//! VERSION:<v>
//! DATE:<MM/DD/YYYY HH:MM:SS -ZZZZ>
//! FILE:<absolute source path>
//! MODDATE:<timestamp>
//! SIZE:<megabytes, 6 fractional digits>
//! HASH:<60-character rendered digest>
//! ```
//!
//! The four-line file block repeats per file. `MODDATE` and `SIZE` are
//! informational; only `FILE` and `HASH` are read back.

use crate::error::{PackratError, Result};
use crate::layout::Layout;
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Manifest line terminator (fixed by the format)
pub const LINE_ENDING: &str = "\r\n";

/// Manifest timestamp format: `MM/DD/YYYY HH:MM:SS -ZZZZ`
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S %z";

/// Suffix carried by in-progress (unpublished) manifests
const TEMP_SUFFIX: &str = ".tmp";

/// Render a timestamp in the manifest format
pub fn format_timestamp(when: DateTime<Local>) -> String {
    when.format(TIMESTAMP_FORMAT).to_string()
}

/// List the published version numbers in ascending order
///
/// `.tmp` stragglers are ignored; any other name that does not parse as a
/// decimal integer aborts with a format error.
pub fn list_versions(layout: &Layout) -> Result<Vec<u64>> {
    let mut versions = Vec::new();
    for entry in fs::read_dir(layout.version_dir())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        let version: u64 = name.parse().map_err(|_| {
            PackratError::format(format!("unparseable version file name {name:?}"))
        })?;
        versions.push(version);
    }
    versions.sort_unstable();
    Ok(versions)
}

/// Highest published version, or 0 for an empty repository
pub fn max_version(layout: &Layout) -> Result<u64> {
    Ok(list_versions(layout)?.last().copied().unwrap_or(0))
}

/// Delete `.tmp` manifest stragglers left by interrupted runs
pub fn remove_stale_temp(layout: &Layout) -> Result<()> {
    for entry in fs::read_dir(layout.version_dir())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(TEMP_SUFFIX) {
            warn!("removing stale temporary manifest {name}");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Allocate the next version number
///
/// Cleans up stragglers first, then takes max + 1.
pub fn allocate_version(layout: &Layout) -> Result<u64> {
    remove_stale_temp(layout)?;
    Ok(max_version(layout)? + 1)
}

/// One per-file record, as written during backup
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Absolute source path
    pub source: String,
    /// Modification time (informational; epoch when stat failed)
    pub modified: DateTime<Local>,
    /// File size in bytes (informational; 0 when stat failed)
    pub size_bytes: u64,
    /// Rendered content digest
    pub digest: String,
}

/// One `(source path, digest)` pair read back from a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Recorded absolute source path
    pub source: String,
    /// Rendered content digest
    pub digest: String,
}

/// Append-only writer for one in-progress manifest
///
/// During backup a single `ManifestWriter` sits behind a mutex and
/// serializes record blocks from all digester workers, so the four lines of
/// a block are always contiguous. Dropping the writer without calling
/// [`ManifestWriter::publish`] leaves the `.tmp` file behind for the next
/// run to collect.
#[derive(Debug)]
pub struct ManifestWriter {
    out: BufWriter<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    version: u64,
    records: usize,
}

impl ManifestWriter {
    /// Open the temporary manifest for `version` and write its header
    pub fn create(layout: &Layout, version: u64) -> Result<Self> {
        let final_path = layout.manifest_path(version);
        let temp_path = layout
            .version_dir()
            .join(format!("{version}{TEMP_SUFFIX}"));

        let file = File::create(&temp_path)?;
        let mut writer = ManifestWriter {
            out: BufWriter::new(file),
            temp_path,
            final_path,
            version,
            records: 0,
        };
        write!(
            writer.out,
            "VERSION:{version}{LINE_ENDING}DATE:{}{LINE_ENDING}",
            format_timestamp(Local::now())
        )?;
        Ok(writer)
    }

    /// Version number this manifest records
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of file records appended so far
    pub fn records(&self) -> usize {
        self.records
    }

    /// Append one four-line file block
    pub fn append(&mut self, record: &FileRecord) -> Result<()> {
        let size_mb = record.size_bytes as f64 / 1024.0 / 1024.0;
        write!(
            self.out,
            "FILE:{}{LINE_ENDING}MODDATE:{}{LINE_ENDING}SIZE:{:.6}{LINE_ENDING}HASH:{}{LINE_ENDING}",
            record.source,
            format_timestamp(record.modified),
            size_mb,
            record.digest,
        )?;
        self.records += 1;
        Ok(())
    }

    /// Close the temporary file and publish it by rename
    pub fn publish(mut self) -> Result<()> {
        self.out.flush()?;
        // The handle must be closed before the rename.
        drop(self.out);
        fs::rename(&self.temp_path, &self.final_path)?;
        info!(
            "published version {} ({} files)",
            self.version, self.records
        );
        Ok(())
    }
}

/// Read the `(source, digest)` pairs of a manifest in file order
///
/// `FILE:` and `HASH:` lines are paired consecutively; all other prefixes
/// are skipped.
pub fn read_entries(path: &Path) -> Result<Vec<ManifestEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut pending_source: Option<String> = None;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if let Some(source) = line.strip_prefix("FILE:") {
            pending_source = Some(source.to_string());
        } else if let Some(digest) = line.strip_prefix("HASH:") {
            if let Some(source) = pending_source.take() {
                entries.push(ManifestEntry {
                    source,
                    digest: digest.to_string(),
                });
            }
        }
    }

    debug!("read {} entries from {:?}", entries.len(), path);
    Ok(entries)
}

/// Read only the `HASH:` values of a manifest
pub fn read_hashes(path: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut hashes = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some(digest) = line.trim_end_matches('\r').strip_prefix("HASH:") {
            hashes.push(digest.to_string());
        }
    }
    Ok(hashes)
}
