//! In-process second-level translation backend.
//!
//! `SoftHypervisor` keeps one guest-physical to host-page table per guest.
//! It enforces the same rules a hardware mapping primitive does: pages must
//! be aligned, inside guest memory, and not already mapped.

use std::collections::{BTreeMap, HashMap};

use crate::backend::{Guest, GuestMapper, Hypervisor, MapRejected, Permissions};
use crate::error::{Error, Result};
use crate::memory::{is_page_aligned, page_align_down, HostPage, PAGE_SIZE};

struct GuestSpace {
    guest: Guest,
    pages: BTreeMap<u64, (HostPage, Permissions)>,
    runnable: bool,
}

/// Software hypervisor holding guest mappings in host memory.
#[derive(Default)]
pub struct SoftHypervisor {
    guests: HashMap<u32, GuestSpace>,
    next_id: u32,
}

impl SoftHypervisor {
    /// Create an empty hypervisor.
    pub fn new() -> Self {
        Self::default()
    }

    fn space(&self, guest: &Guest) -> Result<&GuestSpace> {
        self.guests
            .get(&guest.id())
            .ok_or(Error::GuestNotFound(guest.id()))
    }

    /// Look up a guest by id.
    pub fn guest(&self, id: u32) -> Option<Guest> {
        self.guests.get(&id).map(|space| space.guest)
    }

    /// Number of pages mapped into a guest.
    pub fn mapped_pages(&self, guest: &Guest) -> usize {
        self.guests
            .get(&guest.id())
            .map(|space| space.pages.len())
            .unwrap_or(0)
    }

    /// Whether a guest physical page is mapped.
    pub fn is_mapped(&self, guest: &Guest, gpa: u64) -> bool {
        self.guests
            .get(&guest.id())
            .map(|space| space.pages.contains_key(&page_align_down(gpa)))
            .unwrap_or(false)
    }

    /// Permissions of the mapping covering `gpa`.
    pub fn permissions(&self, guest: &Guest, gpa: u64) -> Option<Permissions> {
        self.guests
            .get(&guest.id())
            .and_then(|space| space.pages.get(&page_align_down(gpa)))
            .map(|(_, perms)| *perms)
    }

    /// Whether the guest has been marked runnable.
    pub fn is_runnable(&self, guest: &Guest) -> bool {
        self.guests
            .get(&guest.id())
            .map(|space| space.runnable)
            .unwrap_or(false)
    }

    /// Read bytes from guest physical memory.
    ///
    /// Every page touched by the read must be mapped.
    pub fn read_guest(&self, guest: &Guest, gpa: u64, buf: &mut [u8]) -> Result<()> {
        let space = self.space(guest)?;
        let mut done = 0usize;
        while done < buf.len() {
            let addr = gpa
                .checked_add(done as u64)
                .ok_or(Error::mapping(gpa, "address overflow"))?;
            let page_base = page_align_down(addr);
            let (page, perms) = space
                .pages
                .get(&page_base)
                .ok_or_else(|| Error::mapping(page_base, "page not mapped"))?;
            if !perms.contains(Permissions::READ) {
                return Err(Error::mapping(page_base, "page not readable"));
            }
            let offset = (addr - page_base) as usize;
            let chunk = std::cmp::min(PAGE_SIZE - offset, buf.len() - done);
            buf[done..done + chunk].copy_from_slice(&page.as_slice()[offset..offset + chunk]);
            done += chunk;
        }
        Ok(())
    }
}

impl GuestMapper for SoftHypervisor {
    fn install(
        &mut self,
        guest: &Guest,
        gpa: u64,
        page: HostPage,
        perms: Permissions,
    ) -> std::result::Result<(), MapRejected> {
        let Some(space) = self.guests.get_mut(&guest.id()) else {
            return Err(MapRejected::new(page, format!("no guest {}", guest.id())));
        };
        if !is_page_aligned(gpa) {
            return Err(MapRejected::new(page, "unaligned guest address"));
        }
        if gpa >= space.guest.memory_size() {
            return Err(MapRejected::new(
                page,
                format!("beyond guest memory (0x{:x})", space.guest.memory_size()),
            ));
        }
        if space.pages.contains_key(&gpa) {
            return Err(MapRejected::new(page, "page already mapped"));
        }

        log::trace!(
            target: "hypervisor",
            "guest {}: 0x{:x} -> host 0x{:x}",
            guest.id(),
            gpa,
            page.host_addr()
        );
        space.pages.insert(gpa, (page, perms));
        Ok(())
    }
}

impl Hypervisor for SoftHypervisor {
    fn create_guest(&mut self, memory_size: u64, entry: u64) -> Result<Guest> {
        if memory_size == 0 {
            return Err(Error::InvalidMemorySize(0));
        }
        let id = self.next_id;
        self.next_id += 1;

        let guest = Guest::new(id, memory_size, entry);
        self.guests.insert(
            id,
            GuestSpace {
                guest,
                pages: BTreeMap::new(),
                runnable: false,
            },
        );
        log::debug!(
            target: "hypervisor",
            "created guest {} ({} bytes, entry 0x{:x})",
            id,
            memory_size,
            entry
        );
        Ok(guest)
    }

    fn set_runnable(&mut self, guest: &Guest) -> Result<()> {
        let space = self
            .guests
            .get_mut(&guest.id())
            .ok_or(Error::GuestNotFound(guest.id()))?;
        space.runnable = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "soft"
    }
}
