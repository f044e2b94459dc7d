//! Trim and repository repair
//!
//! Trim deletes every manifest strictly below a cutoff version and
//! garbage-collects the blobs that only those manifests referenced. The
//! algorithm is a two-pass set subtraction over manifests alone:
//!
//! 1. `Del` = union of all `HASH:` values in manifests below the cutoff
//! 2. remove from `Del` every `HASH:` value in any surviving manifest
//!
//! Whatever remains in `Del` is unreferenced by every surviving manifest and
//! safe to unlink — for any choice of cutoff, a reference in a surviving
//! manifest keeps its blob alive.
//!
//! Fix is the cutoff-at-infinity variant for crash recovery: it rebuilds the
//! keep set from *all* manifests and removes every file in the object store
//! that no manifest references.

use crate::digest;
use crate::error::{PackratError, Result};
use crate::layout::Layout;
use crate::manifest;
use crate::store::ObjectStore;
use std::collections::HashSet;
use std::fs;
use std::str::FromStr;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Parsed trim specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimSpec {
    /// `N`: delete everything strictly below version N
    Below(u64),
    /// `+K`: keep the current maximum plus K prior versions
    KeepLatest(u64),
}

impl TrimSpec {
    /// Compute the cutoff version given the current maximum
    pub fn cutoff(&self, vmax: u64) -> u64 {
        match self {
            TrimSpec::Below(n) => *n,
            TrimSpec::KeepLatest(k) => vmax.saturating_sub(*k),
        }
    }
}

impl FromStr for TrimSpec {
    type Err = PackratError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('+') {
            let k: u64 = rest
                .parse()
                .map_err(|_| PackratError::format(format!("invalid trim specifier {s:?}")))?;
            Ok(TrimSpec::KeepLatest(k))
        } else {
            let n: u64 = s
                .parse()
                .map_err(|_| PackratError::format(format!("invalid trim specifier {s:?}")))?;
            Ok(TrimSpec::Below(n))
        }
    }
}

/// Statistics from one trim run
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    /// Cutoff the specifier resolved to
    pub cutoff: u64,
    /// Manifests unlinked
    pub manifests_removed: usize,
    /// Blobs unlinked
    pub blobs_removed: usize,
}

/// Statistics from one fix run
#[derive(Debug, Clone)]
pub struct FixOutcome {
    /// Orphaned files removed from the object store
    pub blobs_removed: usize,
    /// Blobs still referenced by some manifest
    pub blobs_kept: usize,
}

/// Collect the `HASH:` values of the given versions into `set` (insert) or
/// out of it (remove)
fn collect_hashes(
    layout: &Layout,
    versions: impl Iterator<Item = u64>,
    set: &mut HashSet<String>,
    insert: bool,
) -> Result<()> {
    for version in versions {
        for hash in manifest::read_hashes(&layout.manifest_path(version))? {
            if insert {
                set.insert(hash);
            } else {
                set.remove(&hash);
            }
        }
    }
    Ok(())
}

/// Run a trim against a locked repository
pub(crate) fn run(layout: &Layout, store: &ObjectStore, spec: TrimSpec) -> Result<TrimOutcome> {
    layout.require()?;
    manifest::remove_stale_temp(layout)?;

    let versions = manifest::list_versions(layout)?;
    let vmax = versions.last().copied().unwrap_or(0);
    let cutoff = spec.cutoff(vmax);
    info!("trimming to version {cutoff} (current max {vmax})");

    let mut doomed = HashSet::new();
    collect_hashes(
        layout,
        versions.iter().copied().filter(|&v| v < cutoff),
        &mut doomed,
        true,
    )?;
    collect_hashes(
        layout,
        versions.iter().copied().filter(|&v| v >= cutoff),
        &mut doomed,
        false,
    )?;

    let mut blobs_removed = 0;
    for hash in &doomed {
        if !digest::is_valid_rendered(hash) {
            warn!("ignoring malformed hash {hash:?} during trim");
            continue;
        }
        match store.delete(hash) {
            Ok(()) => blobs_removed += 1,
            Err(e) => warn!("error deleting blob {hash}: {e}"),
        }
    }

    let mut manifests_removed = 0;
    for &version in versions.iter().filter(|&&v| v < cutoff) {
        match fs::remove_file(layout.manifest_path(version)) {
            Ok(()) => {
                debug!("deleted manifest {version}");
                manifests_removed += 1;
            }
            Err(e) => warn!("error deleting manifest {version}: {e}"),
        }
    }

    Ok(TrimOutcome {
        cutoff,
        manifests_removed,
        blobs_removed,
    })
}

/// Reconcile the object store against the union of all manifests
///
/// Every file under `Files/` whose name is not referenced by any manifest is
/// removed, including partial blobs from interrupted runs.
pub(crate) fn fix(layout: &Layout) -> Result<FixOutcome> {
    layout.require()?;
    manifest::remove_stale_temp(layout)?;

    let versions = manifest::list_versions(layout)?;
    let mut keep = HashSet::new();
    collect_hashes(layout, versions.iter().copied(), &mut keep, true)?;
    info!(
        "fix: {} live hashes across {} manifests",
        keep.len(),
        versions.len()
    );

    let mut blobs_removed = 0;
    let mut blobs_kept = 0;
    for entry in WalkDir::new(layout.files_dir()).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("error scanning object store: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if keep.contains(name.as_ref()) {
            blobs_kept += 1;
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("fix removed orphan {name}");
                blobs_removed += 1;
            }
            Err(e) => warn!("error removing orphan {name}: {e}"),
        }
    }

    Ok(FixOutcome {
        blobs_removed,
        blobs_kept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ContentDigest;
    use crate::manifest::{FileRecord, ManifestWriter};
    use chrono::Local;
    use tempfile::TempDir;

    #[test]
    fn test_spec_parsing() {
        assert_eq!("3".parse::<TrimSpec>().unwrap(), TrimSpec::Below(3));
        assert_eq!("+2".parse::<TrimSpec>().unwrap(), TrimSpec::KeepLatest(2));
        assert_eq!(" +0 ".parse::<TrimSpec>().unwrap(), TrimSpec::KeepLatest(0));
        assert!("".parse::<TrimSpec>().is_err());
        assert!("+".parse::<TrimSpec>().is_err());
        assert!("2+".parse::<TrimSpec>().is_err());
        assert!("-1".parse::<TrimSpec>().is_err());
        assert!("abc".parse::<TrimSpec>().is_err());
    }

    #[test]
    fn test_cutoff_math() {
        assert_eq!(TrimSpec::Below(4).cutoff(10), 4);
        assert_eq!(TrimSpec::KeepLatest(3).cutoff(10), 7);
        // Clamped at zero when K exceeds the maximum.
        assert_eq!(TrimSpec::KeepLatest(15).cutoff(10), 0);
    }

    fn seed_version(layout: &Layout, store: &ObjectStore, version: u64, contents: &[&[u8]]) {
        let src = TempDir::new().unwrap();
        let mut writer = ManifestWriter::create(layout, version).unwrap();
        for (i, content) in contents.iter().enumerate() {
            let path = src.path().join(format!("f{i}"));
            std::fs::write(&path, content).unwrap();
            let rendered = ContentDigest::of_bytes(content).render();
            store.insert_from_path(&path, &rendered).unwrap();
            writer
                .append(&FileRecord {
                    source: path.to_string_lossy().into_owned(),
                    modified: Local::now(),
                    size_bytes: content.len() as u64,
                    digest: rendered,
                })
                .unwrap();
        }
        writer.publish().unwrap();
    }

    fn test_repo() -> (Layout, ObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path().to_str().unwrap());
        layout.init().unwrap();
        let store = ObjectStore::new(layout.clone(), None);
        (layout, store, dir)
    }

    #[test]
    fn test_trim_keeps_shared_blobs() {
        let (layout, store, _dir) = test_repo();
        // v1 references "old" and "shared"; v2 references "shared" and "new".
        seed_version(&layout, &store, 1, &[b"old", b"shared"]);
        seed_version(&layout, &store, 2, &[b"shared", b"new"]);

        let outcome = run(&layout, &store, TrimSpec::Below(2)).unwrap();
        assert_eq!(outcome.cutoff, 2);
        assert_eq!(outcome.manifests_removed, 1);
        assert_eq!(outcome.blobs_removed, 1);

        assert!(!layout.manifest_path(1).exists());
        assert!(layout.manifest_path(2).exists());
        assert!(!store
            .contains(&ContentDigest::of_bytes(b"old").render())
            .unwrap());
        assert!(store
            .contains(&ContentDigest::of_bytes(b"shared").render())
            .unwrap());
        assert!(store
            .contains(&ContentDigest::of_bytes(b"new").render())
            .unwrap());
    }

    #[test]
    fn test_trim_keep_latest_form() {
        let (layout, store, _dir) = test_repo();
        for v in 1..=5 {
            seed_version(&layout, &store, v, &[format!("content{v}").as_bytes()]);
        }

        // Keep max plus one prior: cutoff = 5 - 1 = 4.
        let outcome = run(&layout, &store, TrimSpec::KeepLatest(1)).unwrap();
        assert_eq!(outcome.cutoff, 4);
        assert_eq!(outcome.manifests_removed, 3);
        assert!(layout.manifest_path(4).exists());
        assert!(layout.manifest_path(5).exists());
        assert!(!layout.manifest_path(3).exists());
    }

    #[test]
    fn test_trim_requires_layout() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path().to_str().unwrap());
        let store = ObjectStore::new(layout.clone(), None);
        assert!(matches!(
            run(&layout, &store, TrimSpec::Below(1)),
            Err(PackratError::LayoutMissing(_))
        ));
    }

    #[test]
    fn test_fix_removes_orphans_and_stragglers() {
        let (layout, store, _dir) = test_repo();
        seed_version(&layout, &store, 1, &[b"live"]);

        // An orphan blob no manifest references, plus a stale temp manifest.
        let orphan = ContentDigest::of_bytes(b"orphan").render();
        std::fs::write(layout.blob_path(&orphan), b"junk").unwrap();
        std::fs::write(layout.version_dir().join("7.tmp"), b"junk").unwrap();

        let outcome = fix(&layout).unwrap();
        assert_eq!(outcome.blobs_removed, 1);
        assert_eq!(outcome.blobs_kept, 1);
        assert!(!layout.blob_path(&orphan).exists());
        assert!(!layout.version_dir().join("7.tmp").exists());
        assert!(store
            .contains(&ContentDigest::of_bytes(b"live").render())
            .unwrap());
    }
}
