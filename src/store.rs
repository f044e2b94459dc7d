//! Deduplicating object store
//!
//! The object store keeps one blob per unique content, named by the
//! content's rendered digest and fanned out over the 26 bucket directories.
//! Blobs hold the gzip stream of the original bytes; with an encryption key
//! configured they hold the AES-256-GCM sealing of that stream instead.
//!
//! Insertion is at-most-once: an existing blob is never rewritten. Workers
//! racing on the same digest both see "absent" at worst and redo the same
//! compression — wasted work, never corruption, because the bytes they write
//! are identical. A failed insert unlinks whatever partial output it left,
//! so a blob name that exists always names a complete, fsynced write; the
//! worst a crash mid-write can leave is a partial file that `fix` collects
//! as an orphan, since the manifest referencing it was never published.

use crate::crypto;
use crate::error::{PackratError, Result};
use crate::layout::{self, Layout, PathKind};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// What `insert_from_path` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new blob was written
    Stored,
    /// A blob with this digest already existed
    Skipped,
}

/// Handle to the object store of one repository
#[derive(Debug, Clone)]
pub struct ObjectStore {
    layout: Layout,
    key: Option<[u8; crypto::KEY_LEN]>,
}

impl ObjectStore {
    /// Create a store handle over `layout`, sealing blobs with `key` if set
    pub fn new(layout: Layout, key: Option<[u8; crypto::KEY_LEN]>) -> Self {
        ObjectStore { layout, key }
    }

    /// Whether this store encrypts blob payloads
    pub fn is_encrypting(&self) -> bool {
        self.key.is_some()
    }

    /// On-disk path of the blob named by `rendered`
    pub fn blob_path(&self, rendered: &str) -> PathBuf {
        self.layout.blob_path(rendered)
    }

    /// Whether a blob with this digest exists
    pub fn contains(&self, rendered: &str) -> Result<bool> {
        Ok(layout::probe(&self.blob_path(rendered))? == PathKind::File)
    }

    /// Ensure a blob for the content of `src` exists under `rendered`
    ///
    /// If the blob already exists this does nothing and reports
    /// [`InsertOutcome::Skipped`]. Otherwise the source is streamed through
    /// gzip (and sealed, if a key is configured), written, and fsynced
    /// before close.
    pub fn insert_from_path(&self, src: &Path, rendered: &str) -> Result<InsertOutcome> {
        if self.contains(rendered)? {
            trace!("blob {} exists, skipping copy of {:?}", &rendered[..9], src);
            return Ok(InsertOutcome::Skipped);
        }

        let mut source = File::open(src)?;
        let dest = self.blob_path(rendered);

        if let Err(e) = self.write_blob(&mut source, &dest) {
            // A partial blob must not survive under its digest name, or the
            // next backup of the same content would skip the retry.
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        debug!("stored blob {} from {:?}", &rendered[..9], src);
        Ok(InsertOutcome::Stored)
    }

    fn write_blob(&self, source: &mut File, dest: &Path) -> Result<()> {
        match &self.key {
            Some(key) => {
                // Sealing needs the complete compressed stream in memory.
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                io::copy(source, &mut encoder)?;
                let compressed = encoder.finish()?;
                let sealed = crypto::seal(key, &compressed)?;

                let mut out = File::create(dest)?;
                out.write_all(&sealed)?;
                out.sync_all()?;
            }
            None => {
                let out = File::create(dest)?;
                let mut encoder = GzEncoder::new(out, Compression::default());
                io::copy(source, &mut encoder)?;
                let out = encoder.finish()?;
                out.sync_all()?;
            }
        }
        Ok(())
    }

    /// Open a blob file and return a reader over its original plaintext
    ///
    /// The reader decrypts (when keyed) and decompresses transparently.
    /// `blob` is a path rather than a digest so restore can decode staged
    /// copies that live outside the store.
    pub fn plaintext_reader(&self, blob: &Path) -> Result<Box<dyn Read>> {
        match &self.key {
            Some(key) => {
                let sealed = fs::read(blob)?;
                let compressed = crypto::open(key, &sealed)?;
                Ok(Box::new(GzDecoder::new(Cursor::new(compressed))))
            }
            None => {
                let file = File::open(blob)?;
                Ok(Box::new(GzDecoder::new(BufReader::new(file))))
            }
        }
    }

    /// Decode a blob file into a plaintext file at `dst`
    pub fn decode_to_file(&self, blob: &Path, dst: &Path) -> Result<()> {
        let mut reader = self.plaintext_reader(blob)?;
        let mut out = File::create(dst)?;
        io::copy(&mut reader, &mut out)?;
        Ok(())
    }

    /// Unlink the blob named by `rendered`
    ///
    /// Refuses to remove a directory; removing an absent blob is an error.
    pub fn delete(&self, rendered: &str) -> Result<()> {
        let path = self.blob_path(rendered);
        match layout::probe(&path)? {
            PathKind::Directory => Err(PackratError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to delete directory {:?}", path),
            ))),
            PathKind::Absent => Err(PackratError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("blob {:?} not found", path),
            ))),
            PathKind::File => {
                fs::remove_file(&path)?;
                debug!("deleted blob {}", &rendered[..9]);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ContentDigest;
    use tempfile::TempDir;

    fn test_store(key: Option<[u8; 32]>) -> (ObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path().to_str().unwrap());
        layout.init().unwrap();
        (ObjectStore::new(layout, key), dir)
    }

    fn write_source(dir: &TempDir, name: &str, content: &[u8]) -> (PathBuf, String) {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        let rendered = ContentDigest::of_bytes(content).render();
        (path, rendered)
    }

    #[test]
    fn test_insert_and_skip() {
        let (store, dir) = test_store(None);
        let (src, rendered) = write_source(&dir, "a.txt", b"hello world");

        assert!(!store.contains(&rendered).unwrap());
        assert_eq!(
            store.insert_from_path(&src, &rendered).unwrap(),
            InsertOutcome::Stored
        );
        assert!(store.contains(&rendered).unwrap());
        assert_eq!(
            store.insert_from_path(&src, &rendered).unwrap(),
            InsertOutcome::Skipped
        );
    }

    #[test]
    fn test_plain_blob_is_gzip() {
        let (store, dir) = test_store(None);
        let (src, rendered) = write_source(&dir, "a.txt", b"some content here");
        store.insert_from_path(&src, &rendered).unwrap();

        let raw = fs::read(store.blob_path(&rendered)).unwrap();
        assert_eq!(&raw[..2], &[0x1F, 0x8B]);
    }

    #[test]
    fn test_encrypted_blob_hides_gzip_magic() {
        let (store, dir) = test_store(Some([9u8; 32]));
        let content = vec![b'A'; 1000];
        let (src, rendered) = write_source(&dir, "a.txt", &content);
        store.insert_from_path(&src, &rendered).unwrap();

        let raw = fs::read(store.blob_path(&rendered)).unwrap();
        assert!(raw.len() > crypto::NONCE_LEN);
        assert_ne!(
            &raw[crypto::NONCE_LEN..crypto::NONCE_LEN + 2],
            &[0x1F, 0x8B]
        );
    }

    #[test]
    fn test_decode_roundtrip() {
        for key in [None, Some([3u8; 32])] {
            let (store, dir) = test_store(key);
            let content = b"round and round we go";
            let (src, rendered) = write_source(&dir, "a.txt", content);
            store.insert_from_path(&src, &rendered).unwrap();

            let out = dir.path().join("restored.txt");
            store
                .decode_to_file(&store.blob_path(&rendered), &out)
                .unwrap();
            assert_eq!(fs::read(&out).unwrap(), content);
        }
    }

    #[test]
    fn test_wrong_key_cannot_decode() {
        let (store, dir) = test_store(Some([3u8; 32]));
        let (src, rendered) = write_source(&dir, "a.txt", b"secret");
        store.insert_from_path(&src, &rendered).unwrap();

        let wrong = ObjectStore::new(store.layout.clone(), Some([4u8; 32]));
        let out = dir.path().join("out");
        assert!(matches!(
            wrong.decode_to_file(&store.blob_path(&rendered), &out),
            Err(PackratError::Crypto(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (store, dir) = test_store(None);
        let (src, rendered) = write_source(&dir, "a.txt", b"bye");
        store.insert_from_path(&src, &rendered).unwrap();

        store.delete(&rendered).unwrap();
        assert!(!store.contains(&rendered).unwrap());
        assert!(store.delete(&rendered).is_err());
    }

    #[test]
    fn test_delete_refuses_directory() {
        let (store, _dir) = test_store(None);
        // A 60-character name that collides with nothing; make it a directory.
        let rendered = "010".repeat(20);
        fs::create_dir_all(store.blob_path(&rendered)).unwrap();
        assert!(store.delete(&rendered).is_err());
        assert!(store.blob_path(&rendered).is_dir());
    }
}
