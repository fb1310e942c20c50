//! Guest physical memory primitives.
//!
//! Host pages, the page allocator seam, and guest physical ranges used by
//! the loader when populating a guest.

mod guest;
mod page;

pub use guest::GuestPhysicalRange;
pub use page::{HostPage, MmapAllocator, PageAllocator, PAGE_SIZE};

/// Well-known guest physical layout used when booting a guest.
pub mod layout {
    /// Entry address of the boot sector.
    pub const BOOT_ENTRY: u64 = 0x7000;

    /// Size of a raw boot sector image.
    pub const BOOT_SECTOR_SIZE: u64 = 512;
}

/// Round `value` down to a page boundary.
pub const fn page_align_down(value: u64) -> u64 {
    value & !(PAGE_SIZE as u64 - 1)
}

/// Number of pages needed to cover `len` bytes, or `None` on overflow.
pub fn pages_for(len: u64) -> Option<u64> {
    len.checked_add(PAGE_SIZE as u64 - 1)
        .map(|v| v / PAGE_SIZE as u64)
}

/// Check whether an address sits on a page boundary.
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE as u64 - 1) == 0
}
