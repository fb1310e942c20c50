//! Shared fixtures for end-to-end tests.
//!
//! The ELF builder is the crate's own unit-test builder, included by path
//! because `#[cfg(test)]` items are not visible to integration tests.

use std::path::{Path, PathBuf};

#[allow(dead_code)]
#[path = "../../src/loader/testutil.rs"]
mod testutil;

pub use testutil::{pattern, ElfBuilder};

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write image");
    path
}
