//! Host pages handed to the guest mapping primitive.

use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Size of a guest/host page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A single page of host memory.
///
/// The page is owned by exactly one party at a time. It is not `Clone`;
/// ownership ends either by being moved into a guest mapping or by
/// [`PageAllocator::release`]. The backing memory is unmapped on drop.
pub struct HostPage {
    ptr: NonNull<u8>,
}

// Safety: HostPage owns its allocation exclusively and can be sent between threads
unsafe impl Send for HostPage {}

impl HostPage {
    /// Allocate a fresh page with anonymous `mmap`.
    pub fn new() -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(Error::OutOfMemory(format!(
                "mmap failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr })
            .ok_or_else(|| Error::OutOfMemory("mmap returned null".to_string()))
    }

    /// Host virtual address of the page.
    pub fn host_addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    /// Get a slice view of the page.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), PAGE_SIZE) }
    }

    /// Get a mutable slice view of the page.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), PAGE_SIZE) }
    }
}

impl std::fmt::Debug for HostPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostPage({:#x})", self.host_addr())
    }
}

impl Drop for HostPage {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, PAGE_SIZE);
        }
    }
}

/// Source of host pages for the loader.
pub trait PageAllocator {
    /// Allocate one page.
    fn allocate(&mut self) -> Result<HostPage>;

    /// Give back a page that was never mapped.
    fn release(&mut self, page: HostPage);
}

/// `mmap`-backed allocator with an optional page budget.
///
/// Keeps running counts so callers can check that every page handed out
/// was either released or mapped.
#[derive(Debug, Default)]
pub struct MmapAllocator {
    limit: Option<u64>,
    allocated: u64,
    released: u64,
}

impl MmapAllocator {
    /// Create an allocator without a page budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that refuses to hold more than `pages` pages.
    pub fn with_limit(pages: u64) -> Self {
        Self {
            limit: Some(pages),
            ..Self::default()
        }
    }

    /// Total pages handed out.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    /// Total pages given back through [`PageAllocator::release`].
    pub fn released(&self) -> u64 {
        self.released
    }

    /// Pages handed out and not released.
    ///
    /// Releasing pages this allocator never handed out does not drive the
    /// count below zero.
    pub fn outstanding(&self) -> u64 {
        self.allocated.saturating_sub(self.released)
    }
}

impl PageAllocator for MmapAllocator {
    fn allocate(&mut self) -> Result<HostPage> {
        if let Some(limit) = self.limit {
            if self.outstanding() >= limit {
                return Err(Error::OutOfMemory(format!(
                    "page budget of {} exhausted",
                    limit
                )));
            }
        }
        let page = HostPage::new()?;
        self.allocated += 1;
        Ok(page)
    }

    fn release(&mut self, page: HostPage) {
        log::trace!(target: "mapper", "releasing {:?}", page);
        self.released += 1;
        drop(page);
    }
}
