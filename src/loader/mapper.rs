//! Page-granular population of guest physical memory.
//!
//! For every page of the target range the mapper allocates a host page,
//! fills it from the image (zero-padding past the file-backed bytes), and
//! hands it to the hypervisor's mapping primitive. A page is owned by the
//! mapper until it is either installed or released; every error path
//! releases the page it was working on before returning.

use std::io::{Read, Seek};

use crate::backend::{Guest, GuestMapper, Permissions};
use crate::error::{Error, Result};
use crate::loader::image::ImageSource;
use crate::memory::{GuestPhysicalRange, PageAllocator, PAGE_SIZE};

/// Fills and installs guest pages for one range at a time.
pub struct GuestPageMapper<'a, A, M> {
    allocator: &'a mut A,
    mapper: &'a mut M,
}

impl<'a, A: PageAllocator, M: GuestMapper> GuestPageMapper<'a, A, M> {
    pub fn new(allocator: &'a mut A, mapper: &'a mut M) -> Self {
        Self { allocator, mapper }
    }

    /// Populate `range` in `guest`.
    ///
    /// The first `file_size` bytes come from `source` starting at
    /// `file_offset`; the rest of the range is zero. Returns the number of
    /// pages installed. No rollback happens on failure: pages installed
    /// before the failing one stay mapped.
    pub fn map<R: Read + Seek>(
        &mut self,
        guest: &Guest,
        range: GuestPhysicalRange,
        source: &mut ImageSource<R>,
        file_offset: u64,
        file_size: u64,
    ) -> Result<u64> {
        if !range.is_aligned() {
            return Err(Error::UnalignedGuestAddress(range.base));
        }
        if file_size > range.length {
            return Err(Error::invalid_format(format!(
                "file-backed size 0x{:x} exceeds range length 0x{:x}",
                file_size, range.length
            )));
        }
        let page_count = match (range.page_count(), range.end()) {
            (Some(count), Some(_)) => count,
            _ => {
                return Err(Error::invalid_format(format!(
                    "range at 0x{:x} overflows the address space",
                    range.base
                )))
            }
        };

        log::debug!(
            target: "mapper",
            "mapping 0x{:x}..+0x{:x} ({} pages) from offset 0x{:x} (0x{:x} file bytes)",
            range.base,
            range.length,
            page_count,
            file_offset,
            file_size
        );

        if file_size > 0 {
            source.seek_to(file_offset)?;
        }

        for index in 0..page_count {
            let gpa = range.base + index * PAGE_SIZE as u64;
            let consumed = index * PAGE_SIZE as u64;
            let file_bytes = file_size.saturating_sub(consumed).min(PAGE_SIZE as u64) as usize;

            let mut page = self.allocator.allocate()?;

            if file_bytes > 0 {
                if let Err(e) = source.read_exact(&mut page.as_mut_slice()[..file_bytes]) {
                    log::warn!(target: "mapper", "read for page 0x{:x} failed: {}", gpa, e);
                    self.allocator.release(page);
                    return Err(e);
                }
            }
            page.as_mut_slice()[file_bytes..].fill(0);

            if let Err(rejected) = self.mapper.install(guest, gpa, page, Permissions::RWX) {
                log::warn!(
                    target: "mapper",
                    "mapping 0x{:x} rejected: {}",
                    gpa,
                    rejected.reason
                );
                self.allocator.release(rejected.page);
                return Err(Error::mapping(gpa, rejected.reason));
            }
        }

        Ok(page_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Hypervisor, MapRejected, SoftHypervisor};
    use crate::loader::testutil::pattern;
    use crate::memory::{HostPage, MmapAllocator};
    use std::collections::HashSet;
    use std::io::Cursor;

    const MEM: u64 = 0x400000;

    fn setup() -> (SoftHypervisor, Guest, MmapAllocator) {
        let mut hv = SoftHypervisor::new();
        let guest = hv.create_guest(MEM, 0x7000).unwrap();
        (hv, guest, MmapAllocator::new())
    }

    fn source(bytes: Vec<u8>) -> ImageSource<Cursor<Vec<u8>>> {
        ImageSource::new(Cursor::new(bytes)).unwrap()
    }

    /// Records every install target and refuses one chosen address.
    struct RecordingMapper {
        targets: Vec<u64>,
        kept: Vec<HostPage>,
        reject: Option<u64>,
    }

    impl GuestMapper for RecordingMapper {
        fn install(
            &mut self,
            _guest: &Guest,
            gpa: u64,
            page: HostPage,
            _perms: Permissions,
        ) -> std::result::Result<(), MapRejected> {
            self.targets.push(gpa);
            if self.reject == Some(gpa) {
                return Err(MapRejected::new(page, "refused"));
            }
            self.kept.push(page);
            Ok(())
        }
    }

    #[test]
    fn test_partial_page_is_zero_filled() {
        let (mut hv, guest, mut alloc) = setup();
        let data = pattern(100);
        let mut src = source(data.clone());

        let pages = GuestPageMapper::new(&mut alloc, &mut hv)
            .map(&guest, GuestPhysicalRange::new(0x100000, 4096), &mut src, 0, 100)
            .unwrap();

        assert_eq!(pages, 1);
        assert_eq!(alloc.allocated(), 1);
        let mut page = vec![0u8; 4096];
        hv.read_guest(&guest, 0x100000, &mut page).unwrap();
        assert_eq!(&page[..100], &data[..]);
        assert!(page[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bss_pages_are_zero() {
        let (mut hv, guest, mut alloc) = setup();
        let data = pattern(5000);
        let mut src = source(data.clone());

        let pages = GuestPageMapper::new(&mut alloc, &mut hv)
            .map(&guest, GuestPhysicalRange::new(0x200000, 0x3000), &mut src, 0, 5000)
            .unwrap();

        assert_eq!(pages, 3);
        let mut mem = vec![0xffu8; 0x3000];
        hv.read_guest(&guest, 0x200000, &mut mem).unwrap();
        assert_eq!(&mem[..5000], &data[..]);
        assert!(mem[5000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reads_from_file_offset() {
        let (mut hv, guest, mut alloc) = setup();
        let data = pattern(0x2100);
        let mut src = source(data.clone());

        GuestPageMapper::new(&mut alloc, &mut hv)
            .map(&guest, GuestPhysicalRange::new(0x1000, 0x1000), &mut src, 0x2000, 0x100)
            .unwrap();

        let mut mem = vec![0u8; 0x100];
        hv.read_guest(&guest, 0x1000, &mut mem).unwrap();
        assert_eq!(&mem[..], &data[0x2000..0x2100]);
    }

    #[test]
    fn test_page_count_matches_length() {
        for (length, expected) in [(1u64, 1u64), (4096, 1), (4097, 2), (3 * 4096, 3)] {
            let (mut hv, guest, mut alloc) = setup();
            let mut src = source(Vec::new());
            let pages = GuestPageMapper::new(&mut alloc, &mut hv)
                .map(&guest, GuestPhysicalRange::new(0x10000, length), &mut src, 0, 0)
                .unwrap();
            assert_eq!(pages, expected);
            assert_eq!(alloc.allocated(), expected);
            assert_eq!(hv.mapped_pages(&guest) as u64, expected);
        }
    }

    #[test]
    fn test_each_page_installed_once() {
        let mut alloc = MmapAllocator::new();
        let mut mapper = RecordingMapper {
            targets: Vec::new(),
            kept: Vec::new(),
            reject: None,
        };
        let guest = Guest::new(0, MEM, 0);
        let mut src = source(pattern(0x2800));

        GuestPageMapper::new(&mut alloc, &mut mapper)
            .map(&guest, GuestPhysicalRange::new(0x100000, 0x5000), &mut src, 0, 0x2800)
            .unwrap();

        let unique: HashSet<u64> = mapper.targets.iter().copied().collect();
        assert_eq!(mapper.targets.len(), 5);
        assert_eq!(unique.len(), 5);
        assert_eq!(
            mapper.targets,
            vec![0x100000, 0x101000, 0x102000, 0x103000, 0x104000]
        );
    }

    #[test]
    fn test_short_read_releases_page() {
        let (mut hv, guest, mut alloc) = setup();
        let mut src = source(pattern(6000));

        let result = GuestPageMapper::new(&mut alloc, &mut hv).map(
            &guest,
            GuestPhysicalRange::new(0x100000, 0x3000),
            &mut src,
            0,
            0x2800,
        );

        assert!(matches!(result, Err(Error::ShortRead { .. })));
        assert_eq!(alloc.allocated(), 2);
        assert_eq!(alloc.released(), 1);
        assert_eq!(hv.mapped_pages(&guest), 1);
        assert_eq!(alloc.outstanding(), hv.mapped_pages(&guest) as u64);
    }

    #[test]
    fn test_rejected_mapping_releases_page() {
        let mut alloc = MmapAllocator::new();
        let mut mapper = RecordingMapper {
            targets: Vec::new(),
            kept: Vec::new(),
            reject: Some(0x101000),
        };
        let guest = Guest::new(0, MEM, 0);
        let mut src = source(Vec::new());

        let result = GuestPageMapper::new(&mut alloc, &mut mapper).map(
            &guest,
            GuestPhysicalRange::new(0x100000, 0x3000),
            &mut src,
            0,
            0,
        );

        match result {
            Err(Error::MappingFailure { gpa, .. }) => assert_eq!(gpa, 0x101000),
            other => panic!("expected mapping failure, got {:?}", other),
        }
        assert_eq!(alloc.allocated(), 2);
        assert_eq!(alloc.released(), 1);
        assert_eq!(mapper.kept.len(), 1);
    }

    #[test]
    fn test_out_of_memory_keeps_earlier_pages() {
        let (mut hv, guest, _) = setup();
        let mut alloc = MmapAllocator::with_limit(2);
        let mut src = source(Vec::new());

        let result = GuestPageMapper::new(&mut alloc, &mut hv).map(
            &guest,
            GuestPhysicalRange::new(0, 0x3000),
            &mut src,
            0,
            0,
        );

        assert!(matches!(result, Err(Error::OutOfMemory(_))));
        assert_eq!(hv.mapped_pages(&guest), 2);
        assert_eq!(alloc.released(), 0);
    }

    #[test]
    fn test_unaligned_base_rejected_before_allocation() {
        let (mut hv, guest, mut alloc) = setup();
        let mut src = source(pattern(16));

        let result = GuestPageMapper::new(&mut alloc, &mut hv).map(
            &guest,
            GuestPhysicalRange::new(0x100010, 16),
            &mut src,
            0,
            16,
        );

        assert!(matches!(result, Err(Error::UnalignedGuestAddress(0x100010))));
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn test_empty_range_maps_nothing() {
        let (mut hv, guest, mut alloc) = setup();
        let mut src = source(Vec::new());
        let pages = GuestPageMapper::new(&mut alloc, &mut hv)
            .map(&guest, GuestPhysicalRange::new(0x1000, 0), &mut src, 0, 0)
            .unwrap();
        assert_eq!(pages, 0);
        assert_eq!(alloc.allocated(), 0);
    }
}
