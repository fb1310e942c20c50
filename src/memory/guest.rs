//! Guest physical range abstraction.

use super::{is_page_aligned, pages_for, PAGE_SIZE};

/// A range of guest physical memory to populate.
///
/// `length` need not be a multiple of the page size. The tail of the last
/// page is zero-filled by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestPhysicalRange {
    /// Guest physical base address
    pub base: u64,
    /// Length in bytes
    pub length: u64,
}

impl GuestPhysicalRange {
    /// Create a new range.
    pub fn new(base: u64, length: u64) -> Self {
        Self { base, length }
    }

    /// Number of pages covering this range.
    pub fn page_count(&self) -> Option<u64> {
        pages_for(self.length)
    }

    /// Whether the base sits on a page boundary.
    pub fn is_aligned(&self) -> bool {
        is_page_aligned(self.base)
    }

    /// Guest physical address of page `index` within the range.
    pub fn page_addr(&self, index: u64) -> Option<u64> {
        index
            .checked_mul(PAGE_SIZE as u64)
            .and_then(|off| self.base.checked_add(off))
    }

    /// End address (exclusive), or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.base.checked_add(self.length)
    }

    /// Check if two ranges share any page.
    pub fn overlaps_pages(&self, other: &GuestPhysicalRange) -> bool {
        if self.length == 0 || other.length == 0 {
            return false;
        }
        let span = |r: &GuestPhysicalRange| {
            let start = r.base / PAGE_SIZE as u64;
            let end = r.base.saturating_add(r.length - 1) / PAGE_SIZE as u64;
            (start, end)
        };
        let (a_start, a_end) = span(self);
        let (b_start, b_end) = span(other);
        a_start <= b_end && b_start <= a_end
    }
}
