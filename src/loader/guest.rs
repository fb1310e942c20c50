//! Guest image loading.
//!
//! Opens the kernel and boot images and drives the page mapper over them:
//! once per `PT_LOAD` segment of the kernel, once for the boot sector.

use std::io::{Read, Seek};
use std::path::Path;

use crate::backend::{Guest, GuestMapper};
use crate::error::Result;
use crate::loader::elf::{ElfClass, ElfProgramTable, Segment};
use crate::loader::image::ImageSource;
use crate::loader::mapper::GuestPageMapper;
use crate::memory::{GuestPhysicalRange, PageAllocator};

/// Kernel image information after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    /// Entry point from the ELF header
    pub entry: u64,
    /// ELF class of the image
    pub class: ElfClass,
    /// Segments loaded, in program header order
    pub segments: Vec<Segment>,
    /// Total guest pages installed
    pub pages: u64,
}

impl KernelInfo {
    /// Lowest guest physical address occupied by the kernel.
    pub fn load_addr(&self) -> Option<u64> {
        self.segments.iter().map(|s| s.guest_paddr).min()
    }
}

/// Loads kernel and raw images into a guest.
pub struct GuestLoader<'a, A, M> {
    allocator: &'a mut A,
    mapper: &'a mut M,
}

impl<'a, A: PageAllocator, M: GuestMapper> GuestLoader<'a, A, M> {
    pub fn new(allocator: &'a mut A, mapper: &'a mut M) -> Self {
        Self { allocator, mapper }
    }

    /// Load every `PT_LOAD` segment of the ELF kernel at `path`.
    pub fn load_kernel<P: AsRef<Path>>(&mut self, guest: &Guest, path: P) -> Result<KernelInfo> {
        let path = path.as_ref();
        log::info!(target: "loader", "loading kernel {}", path.display());
        let mut source = ImageSource::open(path)?;
        self.load_kernel_from(guest, &mut source)
    }

    /// Load an ELF kernel from an already opened source.
    pub fn load_kernel_from<R: Read + Seek>(
        &mut self,
        guest: &Guest,
        source: &mut ImageSource<R>,
    ) -> Result<KernelInfo> {
        let elf = ElfProgramTable::parse(source)?;

        let mut pages = 0;
        for segment in &elf.segments {
            pages += GuestPageMapper::new(&mut *self.allocator, &mut *self.mapper).map(
                guest,
                segment.range(),
                source,
                segment.file_offset,
                segment.file_size,
            )?;
        }

        log::info!(
            target: "loader",
            "kernel loaded: {} segments, {} pages, entry 0x{:x}",
            elf.segments.len(),
            pages,
            elf.entry
        );

        Ok(KernelInfo {
            entry: elf.entry,
            class: elf.class,
            segments: elf.segments,
            pages,
        })
    }

    /// Load `size` raw bytes from `path` at `offset` into guest memory at `gpa`.
    ///
    /// The whole range is file-backed; a file shorter than `offset + size`
    /// fails with a short read.
    pub fn load_raw<P: AsRef<Path>>(
        &mut self,
        guest: &Guest,
        gpa: u64,
        size: u64,
        path: P,
        offset: u64,
    ) -> Result<u64> {
        let path = path.as_ref();
        log::info!(
            target: "loader",
            "loading raw image {} at 0x{:x} ({} bytes)",
            path.display(),
            gpa,
            size
        );
        let mut source = ImageSource::open(path)?;
        GuestPageMapper::new(&mut *self.allocator, &mut *self.mapper).map(
            guest,
            GuestPhysicalRange::new(gpa, size),
            &mut source,
            offset,
            size,
        )
    }
}
