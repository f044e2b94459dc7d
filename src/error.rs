//! Error types for the packrat library
//!
//! This module defines all error types that can occur during repository
//! operations. Whole-operation preconditions (busy repository, missing
//! layout, malformed version names) surface as dedicated variants so callers
//! can react to them; per-file problems inside an operation are logged and
//! skipped by the operation itself and never reach this type.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the packrat library
pub type Result<T> = std::result::Result<T, PackratError>;

/// Main error type for all packrat operations
#[derive(Debug, Error)]
pub enum PackratError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration record is unusable
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Another mutating operation holds (or abandoned) the in-use marker
    #[error("repository is in use: {0:?} exists (run fixinuse if a previous run crashed)")]
    RepositoryBusy(PathBuf),

    /// A required repository directory is missing
    #[error("repository layout missing: {0:?} not found")]
    LayoutMissing(PathBuf),

    /// A manifest, version name, or trim specifier could not be parsed
    #[error("format error: {0}")]
    Format(String),

    /// Key derivation, sealing, or opening failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Verification found mismatched or unreadable blobs
    #[error("verification failed: {failed} of {checked} blobs bad")]
    VerifyMismatch {
        /// Number of blobs examined
        checked: usize,
        /// Number of blobs that failed to verify
        failed: usize,
    },

    /// The requested version has no manifest
    #[error("version {0} not found")]
    VersionNotFound(u64),
}

impl PackratError {
    /// Create a format error with a custom message
    pub fn format(msg: impl Into<String>) -> Self {
        PackratError::Format(msg.into())
    }

    /// Create a crypto error with a custom message
    pub fn crypto(msg: impl Into<String>) -> Self {
        PackratError::Crypto(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        PackratError::ConfigInvalid(msg.into())
    }

    /// Check if this error means another operation owns the repository
    pub fn is_busy(&self) -> bool {
        matches!(self, PackratError::RepositoryBusy(_))
    }

    /// Check if this error indicates corrupted or missing stored content
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PackratError::VerifyMismatch { .. } | PackratError::Crypto(_)
        )
    }
}
