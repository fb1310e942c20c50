//! Guest image loading.
//!
//! This module parses ELF kernels, reads raw boot images, and populates
//! guest physical memory page by page.

pub mod elf;
pub mod guest;
pub mod image;
pub mod mapper;

#[cfg(test)]
pub(crate) mod testutil;

pub use elf::{ElfClass, ElfImage, ElfProgramTable, Segment};
pub use guest::{GuestLoader, KernelInfo};
pub use image::ImageSource;
pub use mapper::GuestPageMapper;
