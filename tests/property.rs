//! Property-based tests
//!
//! Uses proptest to check the engine's universal properties over randomly
//! generated source trees: deduplication, content addressability, the
//! backup/restore round-trip, and trim liveness.

use packrat::digest::ContentDigest;
use packrat::manifest;
use packrat::{Config, Repository};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Random flat source trees: unique names, arbitrary small contents
fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        "[a-z]{3,8}\\.dat",
        prop::collection::vec(any::<u8>(), 0..512),
        1..10,
    )
}

fn build_repo(
    files: &BTreeMap<String, Vec<u8>>,
    password: Option<&str>,
) -> (Repository, TempDir, TempDir) {
    let repo_dir = TempDir::new().unwrap();
    let src_dir = TempDir::new().unwrap();
    for (name, content) in files {
        fs::write(src_dir.path().join(name), content).unwrap();
    }
    let cfg = Config {
        backup_dir: repo_dir.path().to_string_lossy().into_owned(),
        include: vec![src_dir.path().to_string_lossy().into_owned()],
        encrypt_password: password.map(str::to_string),
        workers: 4,
        ..Config::default()
    };
    (Repository::open(cfg).unwrap(), repo_dir, src_dir)
}

fn blob_count(repo: &Repository) -> usize {
    WalkDir::new(repo.layout().files_dir())
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Blob count equals the number of distinct contents, regardless of how
    /// many files share them.
    #[test]
    fn dedup_stores_each_content_once(files in tree_strategy()) {
        let (repo, _repo_dir, _src_dir) = build_repo(&files, None);
        let outcome = repo.backup().unwrap();
        prop_assert_eq!(outcome.files_recorded, files.len());

        let distinct: HashSet<&Vec<u8>> = files.values().collect();
        prop_assert_eq!(blob_count(&repo), distinct.len());
    }

    /// Every manifest reference resolves to a blob whose decoded content
    /// hashes back to the reference (verify checks exactly this).
    #[test]
    fn content_addressability(files in tree_strategy()) {
        let (repo, _repo_dir, _src_dir) = build_repo(&files, None);
        repo.backup().unwrap();

        let hashes = manifest::read_hashes(&repo.layout().manifest_path(1)).unwrap();
        prop_assert_eq!(hashes.len(), files.len());
        for hash in &hashes {
            prop_assert!(repo.layout().blob_path(hash).exists());
        }
        prop_assert!(repo.verify(0).unwrap().is_ok());
    }

    /// Restoring a backup reproduces the source contents bit for bit
    /// (the generated tree is flat, so the historical path layout is exact).
    #[test]
    fn backup_restore_round_trip(files in tree_strategy()) {
        let (repo, _repo_dir, _src_dir) = build_repo(&files, None);
        repo.backup().unwrap();

        let target = TempDir::new().unwrap();
        let outcome = repo.restore(1, target.path()).unwrap();
        prop_assert_eq!(outcome.files_extracted, files.len());
        prop_assert_eq!(outcome.files_skipped, 0);

        for (name, content) in &files {
            prop_assert_eq!(&fs::read(target.path().join(name)).unwrap(), content);
        }
    }

    /// Encrypted repositories never leak the gzip magic and still restore.
    #[test]
    fn encrypted_blobs_hide_plaintext_structure(files in tree_strategy()) {
        let (repo, _repo_dir, _src_dir) = build_repo(&files, Some("hunter2"));
        repo.backup().unwrap();

        for content in files.values() {
            let blob = repo.layout().blob_path(&ContentDigest::of_bytes(content).render());
            let raw = fs::read(&blob).unwrap();
            prop_assert!(raw.len() > 12);
            prop_assert_ne!(&raw[12..14], &[0x1F, 0x8B]);
        }

        let target = TempDir::new().unwrap();
        repo.restore(1, target.path()).unwrap();
        for (name, content) in &files {
            prop_assert_eq!(&fs::read(target.path().join(name)).unwrap(), content);
        }
    }

    /// After trimming to the latest version, every surviving reference still
    /// has its blob and the dropped manifests are gone.
    #[test]
    fn trim_preserves_liveness(
        files in tree_strategy(),
        mutation in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let (repo, _repo_dir, src_dir) = build_repo(&files, None);
        repo.backup().unwrap();

        // Change the first file and back up again.
        let first = files.keys().next().unwrap();
        fs::write(src_dir.path().join(first), &mutation).unwrap();
        repo.backup().unwrap();

        repo.trim("2").unwrap();

        prop_assert!(!repo.layout().manifest_path(1).exists());
        let survivors = manifest::read_hashes(&repo.layout().manifest_path(2)).unwrap();
        for hash in &survivors {
            prop_assert!(repo.layout().blob_path(hash).exists());
        }
        prop_assert!(repo.verify(0).unwrap().is_ok());
    }
}
