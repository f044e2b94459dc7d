//! Optional blob encryption
//!
//! When an encryption source is configured, every blob is sealed with
//! AES-256-GCM after compression. Wire format:
//! `[12-byte random nonce][ciphertext with appended 16-byte tag]`.
//!
//! Key material comes from one of two places:
//! - `encryptPassword`: key = SHA-256(password bytes)
//! - `encryptKeyFile`: key = first 32 bytes of the file; if the file is
//!   shorter, key = SHA-256(file contents)

use crate::config::Config;
use crate::error::{PackratError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;

/// Key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (GCM standard)
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Derive the blob encryption key from the configuration, if any
pub fn key_from_config(cfg: &Config) -> Result<Option<[u8; KEY_LEN]>> {
    if let Some(password) = &cfg.encrypt_password {
        return Ok(Some(derive_from_password(password)));
    }
    if let Some(key_file) = &cfg.encrypt_key_file {
        return Ok(Some(read_key_file(key_file)?));
    }
    Ok(None)
}

fn derive_from_password(password: &str) -> [u8; KEY_LEN] {
    Sha256::digest(password.as_bytes()).into()
}

fn read_key_file(path: &str) -> Result<[u8; KEY_LEN]> {
    let data = fs::read(path)
        .map_err(|e| PackratError::crypto(format!("failed to read key file {path}: {e}")))?;
    if data.len() < KEY_LEN {
        return Ok(Sha256::digest(&data).into());
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&data[..KEY_LEN]);
    Ok(key)
}

/// Seal `plaintext` under a fresh random nonce
///
/// Returns `nonce || ciphertext || tag`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PackratError::crypto(format!("invalid key: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| PackratError::crypto(format!("AES-GCM seal: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed blob payload
///
/// Fails with a crypto error on truncation, tampering, or the wrong key.
pub fn open(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(PackratError::crypto("sealed payload too short"));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PackratError::crypto(format!("invalid key: {e}")))?;

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| PackratError::crypto("AES-GCM open failed (wrong key or corrupt data)"))
}
