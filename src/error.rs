//! Error types for vmm-loader.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using vmm-loader's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while populating guest memory.
#[derive(Error, Debug)]
pub enum Error {
    // Image errors
    #[error("image not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid image format: {0}")]
    InvalidFormat(String),

    #[error("short read at offset 0x{offset:x}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    // Memory errors
    #[error("host page allocation failed: {0}")]
    OutOfMemory(String),

    #[error("guest mapping at 0x{gpa:x} failed: {reason}")]
    MappingFailure { gpa: u64, reason: String },

    #[error("guest physical address not page-aligned: 0x{0:x}")]
    UnalignedGuestAddress(u64),

    // Configuration errors
    #[error("invalid memory size: {0} MB (must be > 0)")]
    InvalidMemorySize(u64),

    #[error("guest not found: {0}")]
    GuestNotFound(u32),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a mapping failure for the given guest page.
    pub fn mapping(gpa: u64, reason: impl Into<String>) -> Self {
        Error::MappingFailure {
            gpa,
            reason: reason.into(),
        }
    }

    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Error::InvalidFormat(msg.into())
    }
}
