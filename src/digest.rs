//! Content digests and their on-disk rendering
//!
//! Every stored content is addressed by the SHA-1 of its untransformed
//! bytes. The digest's textual form — which names the blob on disk and
//! appears after `HASH:` in manifests — is *not* hex: each of the 20 bytes
//! is rendered as a three-digit zero-padded decimal number, producing a
//! 60-character string. The first two characters of that string select the
//! fan-out bucket; because the leading two digits of a byte never exceed
//! "25", exactly 26 buckets are reachable.
//!
//! Both the decimal rendering and the two-character bucket slice are part of
//! the on-disk contract and must be byte-identical across platforms and
//! implementations.

use crate::error::Result;
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Length of the rendered digest string (20 bytes x 3 digits)
pub const RENDERED_LEN: usize = 60;

/// SHA-1 content digest of a file's raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 20]);

impl ContentDigest {
    /// Digest a file by streaming it through SHA-1
    ///
    /// The file is read in 8 KB chunks; it is never loaded whole.
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        Self::of_reader(&mut file)
    }

    /// Digest an arbitrary byte stream
    pub fn of_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut hasher = Sha1::new();
        let mut buffer = [0u8; 8192];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(ContentDigest(hasher.finalize().into()))
    }

    /// Digest a byte slice already in memory
    pub fn of_bytes(data: &[u8]) -> Self {
        ContentDigest(Sha1::digest(data).into())
    }

    /// The raw 20 digest bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Render to the canonical 60-character decimal form
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(RENDERED_LEN);
        for byte in self.0 {
            out.push_str(&format!("{:03}", byte));
        }
        out
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Check that a string is a plausible rendered digest
///
/// Used when reading `HASH:` lines back out of manifests, before the string
/// is spliced into a filesystem path.
pub fn is_valid_rendered(s: &str) -> bool {
    s.len() == RENDERED_LEN
        && s.bytes().all(|b| b.is_ascii_digit())
        && s.as_bytes()
            .chunks(3)
            .all(|triple| std::str::from_utf8(triple).unwrap().parse::<u16>().unwrap() <= 255)
}

/// Fan-out bucket of a rendered digest (its first two characters)
pub fn bucket(rendered: &str) -> &str {
    &rendered[..2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    // SHA-1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
    const ABC_RENDERED: &str =
        "169153062054071006129106186062037113120080194108156208216157";

    #[test]
    fn test_known_rendering() {
        let digest = ContentDigest::of_bytes(b"abc");
        assert_eq!(digest.render(), ABC_RENDERED);
        assert_eq!(digest.render().len(), RENDERED_LEN);
    }

    #[test]
    fn test_streaming_matches_in_memory() {
        let data = vec![0xABu8; 100_000];
        let from_bytes = ContentDigest::of_bytes(&data);
        let from_reader = ContentDigest::of_reader(&mut Cursor::new(&data)).unwrap();
        assert_eq!(from_bytes, from_reader);
    }

    #[test]
    fn test_of_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(ContentDigest::of_file(&path).unwrap().render(), ABC_RENDERED);

        assert!(ContentDigest::of_file(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_bucket_is_first_two_digits() {
        // First byte 169 renders "169"; the bucket keeps only "16".
        assert_eq!(bucket(ABC_RENDERED), "16");
    }

    #[test]
    fn test_validation() {
        assert!(is_valid_rendered(ABC_RENDERED));
        assert!(!is_valid_rendered("abc"));
        assert!(!is_valid_rendered(&"9".repeat(60))); // 999 > 255
        assert!(!is_valid_rendered(&ABC_RENDERED[..59]));
    }
}
