//! Integrity verification
//!
//! Verify re-derives the content digest of every blob a manifest references:
//! each blob is read back, decrypted when a key is configured, gunzipped,
//! and streamed through SHA-1; the rendering must equal the `HASH:` value
//! that names it. A mismatch means bit-rot, truncation, or a partial write
//! that was later published against — any of which fails the verify — but
//! the scan always continues so the operator sees every bad blob, not just
//! the first.

use crate::digest::{self, ContentDigest};
use crate::error::{PackratError, Result};
use crate::layout::{self, Layout, PathKind};
use crate::manifest;
use crate::store::ObjectStore;
use tracing::{info, warn};

/// One blob that failed verification
#[derive(Debug, Clone)]
pub struct VerifyFailure {
    /// The digest the manifest references
    pub digest: String,
    /// Why the blob failed (mismatch, read error, decrypt error)
    pub reason: String,
}

/// Result of verifying one version
#[derive(Debug, Clone)]
pub struct VerifyReport {
    /// The version that was verified (after resolving the `0` sentinel)
    pub version: u64,
    /// Number of manifest references examined
    pub checked: usize,
    /// Every blob that failed, in manifest order
    pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
    /// Whether every referenced blob verified clean
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert the report into a result, per the operation surface contract
    pub fn into_result(self) -> Result<VerifyReport> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(PackratError::VerifyMismatch {
                checked: self.checked,
                failed: self.failures.len(),
            })
        }
    }
}

/// Verify one version; `0` means the current maximum
pub(crate) fn run(layout: &Layout, store: &ObjectStore, version: u64) -> Result<VerifyReport> {
    layout.require()?;

    let version = if version == 0 {
        manifest::max_version(layout)?
    } else {
        version
    };
    let manifest_path = layout.manifest_path(version);
    if layout::probe(&manifest_path)? != PathKind::File {
        return Err(PackratError::VersionNotFound(version));
    }

    info!("verifying version {version}");
    let hashes = manifest::read_hashes(&manifest_path)?;
    let mut failures = Vec::new();

    for hash in &hashes {
        if let Some(reason) = check_blob(store, hash) {
            warn!("blob {hash} failed verification: {reason}");
            failures.push(VerifyFailure {
                digest: hash.clone(),
                reason,
            });
        }
    }

    info!(
        "verify of version {version}: {} checked, {} failed",
        hashes.len(),
        failures.len()
    );
    Ok(VerifyReport {
        version,
        checked: hashes.len(),
        failures,
    })
}

/// Re-hash one blob; `None` means it verified clean
fn check_blob(store: &ObjectStore, hash: &str) -> Option<String> {
    if !digest::is_valid_rendered(hash) {
        return Some("malformed hash in manifest".to_string());
    }

    let blob = store.blob_path(hash);
    let mut reader = match store.plaintext_reader(&blob) {
        Ok(reader) => reader,
        Err(e) => return Some(format!("cannot open blob: {e}")),
    };
    let actual = match ContentDigest::of_reader(&mut reader) {
        Ok(digest) => digest.render(),
        Err(e) => return Some(format!("cannot read blob: {e}")),
    };
    if actual != hash {
        return Some(format!("digest mismatch: stored content hashes to {actual}"));
    }
    None
}
